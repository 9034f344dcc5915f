//! # Ephemeral Token Issuer
//!
//! Single-use, time-boxed tokens for password reset and email
//! verification. One live token per kind per identity; issuing a new one
//! invalidates its predecessor, consuming clears it atomically.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthError, AuthResult};
use crate::identity::{Identity, IdentityRepository};

// ==================
// Token Kinds
// ==================

/// The two ephemeral token kinds. Never interchangeable: a verification
/// token cannot satisfy a reset consume, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Reset,
    Verification,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Reset => write!(f, "reset"),
            TokenKind::Verification => write!(f, "verification"),
        }
    }
}

// ==================
// Configuration
// ==================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Reset-token lifetime (30 minutes is authoritative; see DESIGN.md)
    pub reset_minutes: i64,
    pub verification_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            reset_minutes: 30,
            verification_hours: 24,
        }
    }
}

impl TokenConfig {
    fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Reset => Duration::minutes(self.reset_minutes),
            TokenKind::Verification => Duration::hours(self.verification_hours),
        }
    }
}

// ==================
// Token Issuer
// ==================

pub struct TokenIssuer<R: IdentityRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
}

impl<R: IdentityRepository> TokenIssuer<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: TokenConfig) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    /// Generate and store a token of the given kind, overwriting any prior
    /// token of that kind. The raw value is returned exactly once; it is
    /// never retrievable afterwards.
    pub fn issue(&self, id: Uuid, kind: TokenKind) -> AuthResult<String> {
        let raw = generate_token();
        let expires_at = self.clock.now() + self.config.lifetime(kind);
        let now = self.clock.now();

        self.repo.update_with(id, &mut |rec| {
            set_token(rec, kind, Some((raw.clone(), expires_at)));
            rec.updated_at = now;
        })?;

        Ok(raw)
    }

    /// Look up the identity holding this token and clear it (single use).
    ///
    /// The match is re-checked inside the atomic update, so two concurrent
    /// consumes of the same token resolve to exactly one winner; the loser
    /// sees `TokenNotFound`.
    pub fn consume(&self, token: &str, kind: TokenKind) -> AuthResult<Identity> {
        let candidate = self
            .repo
            .find_where(&|rec| {
                stored_token(rec, kind)
                    .map(|(stored, _)| token_eq(stored, token))
                    .unwrap_or(false)
            })?
            .ok_or(AuthError::TokenNotFound)?;

        let now = self.clock.now();
        let mut outcome: AuthResult<()> = Ok(());
        let updated = self.repo.update_with(candidate.id, &mut |rec| {
            let current = match kind {
                TokenKind::Reset => rec.reset_token.clone().zip(rec.reset_expires_at),
                TokenKind::Verification => rec
                    .verification_token
                    .clone()
                    .zip(rec.verification_expires_at),
            };
            match current {
                Some((stored, expires_at)) if token_eq(&stored, token) => {
                    if expires_at < now {
                        outcome = Err(AuthError::TokenExpired);
                    } else {
                        set_token(rec, kind, None);
                        rec.updated_at = now;
                        outcome = Ok(());
                    }
                }
                // Cleared or replaced between the scan and this update
                _ => outcome = Err(AuthError::TokenNotFound),
            }
        })?;

        outcome.map(|()| updated)
    }
}

// ==================
// Helpers
// ==================

/// 32 bytes from the OS RNG, base64url without padding (256 bits)
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Full-value constant-time comparison; no prefix short-circuit for an
/// attacker to probe.
fn token_eq(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

fn stored_token(rec: &Identity, kind: TokenKind) -> Option<(&String, &DateTime<Utc>)> {
    match kind {
        TokenKind::Reset => rec.reset_token.as_ref().zip(rec.reset_expires_at.as_ref()),
        TokenKind::Verification => rec
            .verification_token
            .as_ref()
            .zip(rec.verification_expires_at.as_ref()),
    }
}

fn set_token(rec: &mut Identity, kind: TokenKind, value: Option<(String, DateTime<Utc>)>) {
    let (token, expires_at) = match value {
        Some((t, e)) => (Some(t), Some(e)),
        None => (None, None),
    };
    match kind {
        TokenKind::Reset => {
            rec.reset_token = token;
            rec.reset_expires_at = expires_at;
        }
        TokenKind::Verification => {
            rec.verification_token = token;
            rec.verification_expires_at = expires_at;
        }
    }
}
