//! # Second-Factor Manager
//!
//! Time-based one-time codes (RFC 6238) as an additional login factor.
//! Enrollment is two-step: the secret sits in a pending slot until the
//! user proves they captured it by confirming a current code; only then
//! does the enabled flag flip and the secret become active.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthError, AuthResult};
use crate::identity::{Identity, IdentityRepository};

// ==================
// TOTP Configuration
// ==================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpConfig {
    /// Issuer name (shown in authenticator apps)
    pub issuer: String,
    /// Number of digits (default: 6)
    pub digits: u32,
    /// Time step in seconds (default: 30)
    pub period: u64,
    /// Algorithm (default: SHA1 for authenticator-app compatibility)
    pub algorithm: TotpAlgorithm,
    /// Steps to check before/after current (default: 1)
    pub skew: u32,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: "Municipal Fines Portal".to_string(),
            digits: 6,
            period: 30,
            algorithm: TotpAlgorithm::SHA1,
            skew: 1,
        }
    }
}

/// TOTP hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotpAlgorithm {
    SHA1,
    SHA256,
    SHA512,
}

impl std::fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotpAlgorithm::SHA1 => write!(f, "SHA1"),
            TotpAlgorithm::SHA256 => write!(f, "SHA256"),
            TotpAlgorithm::SHA512 => write!(f, "SHA512"),
        }
    }
}

// ==================
// TOTP Primitives
// ==================

/// Generate a shared secret: 20 random bytes, base32 (160 bits)
fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

/// Base32 encoding (RFC 4648, no padding)
fn base32_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut result = String::new();
    let mut buffer: u64 = 0;
    let mut bits_left = 0;

    for &byte in data {
        buffer = (buffer << 8) | (byte as u64);
        bits_left += 8;
        while bits_left >= 5 {
            bits_left -= 5;
            result.push(ALPHABET[((buffer >> bits_left) & 0x1F) as usize] as char);
        }
    }
    if bits_left > 0 {
        result.push(ALPHABET[((buffer << (5 - bits_left)) & 0x1F) as usize] as char);
    }
    result
}

/// Base32 decoding
fn base32_decode(encoded: &str) -> Option<Vec<u8>> {
    const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut result = Vec::new();
    let mut buffer: u64 = 0;
    let mut bits_left = 0;

    for c in encoded.chars() {
        let c = c.to_ascii_uppercase();
        if c == '=' {
            continue;
        }
        let value = ALPHABET.find(c)? as u64;
        buffer = (buffer << 5) | value;
        bits_left += 5;
        if bits_left >= 8 {
            bits_left -= 8;
            result.push((buffer >> bits_left) as u8);
        }
    }
    Some(result)
}

/// Generate the code for a given Unix timestamp
pub fn generate_code(secret: &str, timestamp: u64, config: &TotpConfig) -> AuthResult<String> {
    let secret_bytes = base32_decode(secret)
        .ok_or_else(|| AuthError::Internal("invalid TOTP secret encoding".to_string()))?;

    let counter = timestamp / config.period;
    let hash = compute_hmac(&secret_bytes, &counter.to_be_bytes(), config.algorithm);

    // Dynamic truncation (RFC 4226 §5.3)
    let offset = (hash[hash.len() - 1] & 0x0F) as usize;
    let binary = ((hash[offset] & 0x7F) as u32) << 24
        | (hash[offset + 1] as u32) << 16
        | (hash[offset + 2] as u32) << 8
        | (hash[offset + 3] as u32);

    let otp = binary % 10u32.pow(config.digits);
    Ok(format!("{:0>width$}", otp, width = config.digits as usize))
}

fn compute_hmac(key: &[u8], data: &[u8], algorithm: TotpAlgorithm) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha1::Sha1;
    use sha2::{Sha256, Sha512};

    match algorithm {
        TotpAlgorithm::SHA1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC can accept any key size");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::SHA256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC can accept any key size");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::SHA512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("HMAC can accept any key size");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Check a code against the secret within the skew window
fn code_matches(secret: &str, code: &str, now: u64, config: &TotpConfig) -> AuthResult<bool> {
    for offset in 0..=config.skew {
        let ts = now + offset as u64 * config.period;
        if generate_code(secret, ts, config)? == code {
            return Ok(true);
        }
        if offset > 0 {
            let ts = now.saturating_sub(offset as u64 * config.period);
            if generate_code(secret, ts, config)? == code {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// otpauth:// URI for provisioning a code-generator app
pub fn provisioning_uri(secret: &str, email: &str, config: &TotpConfig) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm={}&digits={}&period={}",
        urlencoding::encode(&config.issuer),
        urlencoding::encode(email),
        secret,
        urlencoding::encode(&config.issuer),
        config.algorithm,
        config.digits,
        config.period
    )
}

// ==================
// Second-Factor Service
// ==================

/// Material handed back once at enrollment
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: String,
    pub provisioning_uri: String,
}

pub struct SecondFactorService<R: IdentityRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    config: TotpConfig,
}

impl<R: IdentityRepository> SecondFactorService<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: TotpConfig) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    /// Start enrollment: generate a pending secret (enabled stays false
    /// until confirmed). Re-enrolling before confirmation overwrites the
    /// pending secret.
    pub fn enroll(&self, id: Uuid) -> AuthResult<Enrollment> {
        let identity = self
            .repo
            .find_by_id(id)?
            .ok_or(AuthError::IdentityNotFound)?;
        if identity.totp_enabled {
            return Err(AuthError::Validation(
                "second factor is already enabled".to_string(),
            ));
        }

        let secret = generate_secret();
        let uri = provisioning_uri(&secret, &identity.email, &self.config);
        let now = self.clock.now();

        self.repo.update_with(id, &mut |rec| {
            rec.totp_pending_secret = Some(secret.clone());
            rec.updated_at = now;
        })?;

        Ok(Enrollment {
            secret,
            provisioning_uri: uri,
        })
    }

    /// Confirm enrollment with a current code. Success promotes the pending
    /// secret and flips the enabled flag; failure retains the pending
    /// secret so the user can retry with a freshly displayed code.
    pub fn confirm(&self, id: Uuid, code: &str) -> AuthResult<()> {
        let identity = self
            .repo
            .find_by_id(id)?
            .ok_or(AuthError::IdentityNotFound)?;
        let pending = identity
            .totp_pending_secret
            .as_deref()
            .ok_or_else(|| AuthError::Validation("no enrollment in progress".to_string()))?;

        if !code_matches(pending, code, self.clock.unix(), &self.config)? {
            return Err(AuthError::InvalidCode);
        }

        let now = self.clock.now();
        self.repo.update_with(id, &mut |rec| {
            rec.totp_secret = rec.totp_pending_secret.take();
            rec.totp_enabled = true;
            rec.updated_at = now;
        })?;

        Ok(())
    }

    /// Login-time code check against the active secret.
    ///
    /// Returns a plain boolean; the outer login flow counts a failure
    /// exactly like a password failure for lockout purposes.
    pub fn verify(&self, identity: &Identity, code: &str) -> AuthResult<bool> {
        let secret = identity
            .totp_secret
            .as_deref()
            .filter(|_| identity.totp_enabled)
            .ok_or_else(|| AuthError::Validation("second factor not enabled".to_string()))?;

        code_matches(secret, code, self.clock.unix(), &self.config)
    }

    /// Clear both secrets and the enabled flag. The facade requires fresh
    /// primary-credential verification before calling this.
    pub fn disable(&self, id: Uuid) -> AuthResult<()> {
        let now = self.clock.now();
        self.repo.update_with(id, &mut |rec| {
            rec.totp_secret = None;
            rec.totp_pending_secret = None;
            rec.totp_enabled = false;
            rec.updated_at = now;
        })?;
        Ok(())
    }
}
