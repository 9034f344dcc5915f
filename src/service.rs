//! # Auth Service Facade
//!
//! The interface the surrounding CRUD layers call. Wires the login
//! pipeline (lockout gate → password check → second factor → session
//! issuance), the reset/verification flows, and session rotation, and
//! fires audit hooks along the way.
//!
//! Nothing returned from this module ever contains a password hash, a
//! TOTP secret, or a stored ephemeral token value; the only credential
//! material that crosses the boundary is the single issuance return of
//! each token and the enrollment secret.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::credentials::{CredentialConfig, CredentialStore, NewIdentity};
use crate::ephemeral::{TokenConfig, TokenIssuer, TokenKind};
use crate::errors::{AuthError, AuthResult};
use crate::events::{AuthEvent, AuthEventPayload, AuthHooks};
use crate::identity::{Identity, IdentityRepository};
use crate::lockout::{LockState, LockoutConfig, LockoutGuard};
use crate::second_factor::{Enrollment, SecondFactorService, TotpConfig};
use crate::session::{SessionConfig, SessionManager, TokenPair};

// ==================
// Configuration
// ==================

/// Aggregate configuration for the whole subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub credentials: CredentialConfig,
    pub lockout: LockoutConfig,
    pub tokens: TokenConfig,
    pub totp: TotpConfig,
    pub session: SessionConfig,
}

impl AuthConfig {
    /// Defaults everywhere except the signing key, which has none
    pub fn new(signing_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            credentials: CredentialConfig::default(),
            lockout: LockoutConfig::default(),
            tokens: TokenConfig::default(),
            totp: TotpConfig::default(),
            session: SessionConfig::new(signing_secret),
        }
    }
}

// ==================
// Token Delivery
// ==================

/// How reset and verification tokens reach the user. Owned by the
/// surrounding system (email, SMS); this crate never sends anything
/// itself. The raw token passes through here exactly once.
pub trait TokenDelivery: Send + Sync {
    fn deliver(&self, email: &str, kind: TokenKind, token: &str) -> AuthResult<()>;
}

// ==================
// Auth Service
// ==================

pub struct AuthService<R: IdentityRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    credentials: CredentialStore<R>,
    lockout: LockoutGuard<R>,
    tokens: TokenIssuer<R>,
    second_factor: SecondFactorService<R>,
    sessions: SessionManager,
    hooks: AuthHooks,
    delivery: Option<Arc<dyn TokenDelivery>>,
}

impl<R: IdentityRepository> AuthService<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: AuthConfig) -> Self {
        Self {
            credentials: CredentialStore::new(
                Arc::clone(&repo),
                Arc::clone(&clock),
                config.credentials,
            ),
            lockout: LockoutGuard::new(Arc::clone(&repo), Arc::clone(&clock), config.lockout),
            tokens: TokenIssuer::new(Arc::clone(&repo), Arc::clone(&clock), config.tokens),
            second_factor: SecondFactorService::new(
                Arc::clone(&repo),
                Arc::clone(&clock),
                config.totp,
            ),
            sessions: SessionManager::new(config.session, Arc::clone(&clock)),
            hooks: AuthHooks::new(),
            delivery: None,
            repo,
            clock,
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn TokenDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Register audit handlers here
    pub fn hooks(&self) -> &AuthHooks {
        &self.hooks
    }

    /// Direct access for registration flows
    pub fn credentials(&self) -> &CredentialStore<R> {
        &self.credentials
    }

    /// Validate an access token for a downstream request
    pub fn validate_access(&self, token: &str) -> AuthResult<crate::session::SessionClaims> {
        self.sessions.validate_access(token)
    }

    // ==================
    // Registration
    // ==================

    pub fn register(&self, fields: NewIdentity) -> AuthResult<Identity> {
        self.credentials.create_identity(fields)
    }

    // ==================
    // Login
    // ==================

    /// Full login pipeline. The identifier resolves via email, phone, then
    /// license; unknown and inactive accounts fail exactly like a wrong
    /// password, including the hashing cost, so neither the error nor the
    /// response time reveals whether the account exists. The lock check
    /// precedes password verification, so a locked account is rejected
    /// before any hashing runs and the response never varies with the
    /// attempt count.
    pub fn login(
        &self,
        identifier: &str,
        password: &str,
        second_factor_code: Option<&str>,
    ) -> AuthResult<TokenPair> {
        let identity = match self.resolve(identifier)?.filter(|identity| identity.active) {
            Some(identity) => identity,
            None => {
                self.credentials.verify_against_decoy(password);
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.lockout.ensure_unlocked(&identity)?;

        if !self.credentials.verify_password(&identity, password) {
            return Err(self.count_failure(identity.id));
        }

        if identity.totp_enabled {
            let ok = match second_factor_code {
                Some(code) => self.second_factor.verify(&identity, code)?,
                None => false,
            };
            // A second-factor miss counts exactly like a password miss
            if !ok {
                return Err(self.count_failure(identity.id));
            }
        }

        self.lockout.record_success(identity.id)?;
        let pair = self.sessions.issue(&identity)?;
        self.fire(AuthEvent::LoginSucceeded, identity.id, None);
        Ok(pair)
    }

    // ==================
    // Password Reset
    // ==================

    /// Always succeeds from the caller's perspective, even for unknown
    /// emails, so responses cannot be used to enumerate accounts.
    pub fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let identity = match self.credentials.find_by_email(email)? {
            Some(identity) => identity,
            None => {
                tracing::debug!("password reset requested for unknown email");
                return Ok(());
            }
        };

        let token = self.tokens.issue(identity.id, TokenKind::Reset)?;
        self.fire(AuthEvent::PasswordResetRequested, identity.id, None);
        if let Some(delivery) = &self.delivery {
            delivery.deliver(&identity.email, TokenKind::Reset, &token)?;
        }
        Ok(())
    }

    pub fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        // A weak password must not burn the single-use token
        self.credentials.validate_new_password(new_password)?;

        let identity = self.tokens.consume(token, TokenKind::Reset)?;
        self.credentials.rotate_password(identity.id, new_password)?;
        self.fire(AuthEvent::PasswordRotated, identity.id, None);
        Ok(())
    }

    // ==================
    // Email Verification
    // ==================

    pub fn request_email_verification(&self, id: Uuid) -> AuthResult<()> {
        let identity = self
            .repo
            .find_by_id(id)?
            .ok_or(AuthError::IdentityNotFound)?;

        let token = self.tokens.issue(identity.id, TokenKind::Verification)?;
        if let Some(delivery) = &self.delivery {
            delivery.deliver(&identity.email, TokenKind::Verification, &token)?;
        }
        Ok(())
    }

    pub fn verify_email(&self, token: &str) -> AuthResult<()> {
        let identity = self.tokens.consume(token, TokenKind::Verification)?;
        let now = self.clock.now();
        self.repo.update_with(identity.id, &mut |rec| {
            rec.email_verified = true;
            rec.updated_at = now;
        })?;
        self.fire(AuthEvent::EmailVerified, identity.id, None);
        Ok(())
    }

    // ==================
    // Second Factor
    // ==================

    pub fn enable_second_factor(&self, id: Uuid) -> AuthResult<Enrollment> {
        let enrollment = self.second_factor.enroll(id)?;
        self.fire(AuthEvent::SecondFactorEnrolled, id, None);
        Ok(enrollment)
    }

    pub fn confirm_second_factor(&self, id: Uuid, code: &str) -> AuthResult<()> {
        self.second_factor.confirm(id, code)?;
        self.fire(AuthEvent::SecondFactorConfirmed, id, None);
        Ok(())
    }

    /// Requires fresh primary-credential proof; never reachable from an
    /// unauthenticated context.
    pub fn disable_second_factor(&self, id: Uuid, password: &str) -> AuthResult<()> {
        let identity = self
            .repo
            .find_by_id(id)?
            .ok_or(AuthError::IdentityNotFound)?;

        if !self.credentials.verify_password(&identity, password) {
            return Err(AuthError::InvalidCredentials);
        }

        self.second_factor.disable(id)?;
        self.fire(AuthEvent::SecondFactorDisabled, id, None);
        Ok(())
    }

    // ==================
    // Sessions
    // ==================

    pub fn refresh_session(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        match self.sessions.rotate(refresh_token) {
            Ok(pair) => {
                if let Ok(claims) = self.sessions.peek(&pair.access_token) {
                    self.fire(AuthEvent::SessionRotated, claims.sub, None);
                }
                Ok(pair)
            }
            Err(err) => {
                // Attribute a replayed token for the audit trail; the
                // failure stands regardless
                if matches!(err, AuthError::InvalidToken(_)) {
                    if let Ok(claims) = self.sessions.peek(refresh_token) {
                        self.fire(AuthEvent::RefreshReuseDetected, claims.sub, None);
                    }
                }
                Err(err)
            }
        }
    }

    pub fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let identity_id = self.sessions.peek(refresh_token).map(|c| c.sub).ok();
        self.sessions.revoke(refresh_token)?;
        if let Some(id) = identity_id {
            self.fire(AuthEvent::LoggedOut, id, None);
        }
        Ok(())
    }

    // ==================
    // Internals
    // ==================

    fn resolve(&self, identifier: &str) -> AuthResult<Option<Identity>> {
        if let Some(identity) = self.credentials.find_by_email(identifier)? {
            return Ok(Some(identity));
        }
        if let Some(identity) = self.credentials.find_by_phone(identifier)? {
            return Ok(Some(identity));
        }
        self.credentials.find_by_license(identifier)
    }

    /// Record one failed attempt and translate the resulting state into
    /// the boundary error: the locking failure itself reports the lock.
    fn count_failure(&self, id: Uuid) -> AuthError {
        let state = match self.lockout.record_failure(id) {
            Ok(state) => state,
            Err(err) => return err,
        };
        self.fire(AuthEvent::LoginFailed, id, None);
        match state {
            LockState::Locked { remaining } => {
                self.fire(
                    AuthEvent::AccountLocked,
                    id,
                    Some(serde_json::json!({ "remaining_secs": remaining.num_seconds() })),
                );
                AuthError::AccountLocked {
                    remaining_secs: remaining.num_seconds().max(1),
                }
            }
            LockState::Open | LockState::Warned { .. } => AuthError::InvalidCredentials,
        }
    }

    fn fire(&self, event: AuthEvent, identity_id: Uuid, metadata: Option<serde_json::Value>) {
        let mut payload = AuthEventPayload::new(event, identity_id, self.clock.now());
        if let Some(metadata) = metadata {
            payload = payload.with_metadata(metadata);
        }
        self.hooks.trigger(&payload);
    }
}
