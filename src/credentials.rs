//! # Credential Store
//!
//! Owns creation of identity records and the password lifecycle: slow
//! hashing on create, constant-time verification, and rotation that kills
//! any outstanding reset token.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthError, AuthResult};
use crate::identity::{Identity, IdentityRepository, Role};

// ==================
// Configuration
// ==================

/// Hashing cost and input rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Argon2id memory cost in KiB
    pub memory_kib: u32,
    /// Argon2id iterations
    pub iterations: u32,
    /// Argon2id lanes
    pub parallelism: u32,
    pub min_password_len: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
            min_password_len: 8,
        }
    }
}

/// Fields supplied by registration
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub phone: String,
    pub license: Option<String>,
    pub password: String,
    pub role: Role,
}

// ==================
// Credential Store
// ==================

pub struct CredentialStore<R: IdentityRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    config: CredentialConfig,
    email_re: Regex,
    phone_re: Regex,
    license_re: Regex,
    /// Hash verified against when no identity matched, so an unknown
    /// identifier costs the same as a wrong password
    decoy_hash: String,
}

impl<R: IdentityRepository> CredentialStore<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: CredentialConfig) -> Self {
        let mut store = Self {
            repo,
            clock,
            config,
            email_re: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").unwrap(),
            // E.164-like: +, leading non-zero digit, 8-15 digits total
            phone_re: Regex::new(r"^\+[1-9][0-9]{7,14}$").unwrap(),
            license_re: Regex::new(r"^[A-Za-z0-9-]{4,20}$").unwrap(),
            decoy_hash: String::new(),
        };
        store.decoy_hash = store.hash_password("decoy").unwrap_or_default();
        store
    }

    /// Validate, hash, and persist a new identity.
    ///
    /// The hash is computed before the repository is touched, so the slow
    /// argon2 work never runs under the store's exclusivity.
    pub fn create_identity(&self, fields: NewIdentity) -> AuthResult<Identity> {
        self.validate(&fields)?;

        let password_hash = self.hash_password(&fields.password)?;
        let now = self.clock.now();

        let identity = Identity {
            id: Uuid::new_v4(),
            email: fields.email.trim().to_lowercase(),
            phone: fields.phone,
            license: fields.license,
            password_hash,
            role: fields.role,
            active: true,
            email_verified: false,
            phone_verified: false,
            totp_enabled: false,
            totp_secret: None,
            totp_pending_secret: None,
            failed_attempts: 0,
            locked_until: None,
            last_login_at: None,
            reset_token: None,
            reset_expires_at: None,
            verification_token: None,
            verification_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.create(identity)
    }

    /// Constant-time password check.
    ///
    /// Returns `false` on mismatch or on an unparsable stored hash; never
    /// errors, never logs the candidate or the hash.
    pub fn verify_password(&self, identity: &Identity, candidate: &str) -> bool {
        let parsed = match PasswordHash::new(&identity.password_hash) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(identity_id = %identity.id, "stored password hash is unparsable");
                return false;
            }
        };

        self.hasher().verify_password(candidate.as_bytes(), &parsed).is_ok()
    }

    /// Verify a candidate against the throwaway hash. The login path calls
    /// this when no identity matched, so an unknown identifier cannot be
    /// told apart from a wrong password by response time.
    pub fn verify_against_decoy(&self, candidate: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.decoy_hash) {
            let _ = self.hasher().verify_password(candidate.as_bytes(), &parsed);
        }
    }

    /// Length check shared by create, rotate, and the reset flow (which
    /// must reject a weak password *before* consuming the reset token).
    pub fn validate_new_password(&self, plaintext: &str) -> AuthResult<()> {
        if plaintext.len() < self.config.min_password_len {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_len
            )));
        }
        Ok(())
    }

    /// Replace the stored hash and invalidate any outstanding reset token.
    pub fn rotate_password(&self, id: Uuid, new_plaintext: &str) -> AuthResult<()> {
        self.validate_new_password(new_plaintext)?;

        // Hash outside the record lock; only the field swap is exclusive.
        let new_hash = self.hash_password(new_plaintext)?;
        let now = self.clock.now();

        self.repo.update_with(id, &mut |rec| {
            rec.password_hash = new_hash.clone();
            rec.reset_token = None;
            rec.reset_expires_at = None;
            rec.updated_at = now;
        })?;

        tracing::info!(identity_id = %id, "password rotated");
        Ok(())
    }

    pub fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        self.repo.find_by_email(email.trim())
    }

    pub fn find_by_phone(&self, phone: &str) -> AuthResult<Option<Identity>> {
        self.repo.find_by_phone(phone)
    }

    pub fn find_by_license(&self, license: &str) -> AuthResult<Option<Identity>> {
        self.repo.find_by_license(license)
    }

    fn validate(&self, fields: &NewIdentity) -> AuthResult<()> {
        if !self.email_re.is_match(fields.email.trim()) {
            return Err(AuthError::Validation("invalid email format".to_string()));
        }
        if !self.phone_re.is_match(&fields.phone) {
            return Err(AuthError::Validation(
                "phone must be E.164-like, e.g. +15551234567".to_string(),
            ));
        }
        if let Some(license) = &fields.license {
            if !self.license_re.is_match(license) {
                return Err(AuthError::Validation(
                    "invalid driver-license number".to_string(),
                ));
            }
        }
        self.validate_new_password(&fields.password)
    }

    fn hasher(&self) -> Argon2<'_> {
        let params = Params::new(
            self.config.memory_kib,
            self.config.iterations,
            self.config.parallelism,
            None,
        )
        .unwrap_or_default();
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    fn hash_password(&self, plaintext: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }
}
