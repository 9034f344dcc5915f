//! # Session Coordinator
//!
//! Stateless signed access/refresh token pairs with single-use refresh
//! rotation. Access tokens verify without a store lookup; the only state
//! this component owns is the set of consumed refresh-token ids, and
//! membership there is terminal: a revoked session never comes back.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthError, AuthResult};
use crate::identity::{Identity, Role};

// ==================
// Configuration
// ==================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// HS256 signing key
    pub secret: Vec<u8>,
    /// Access-token lifetime in minutes
    pub access_minutes: i64,
    /// Refresh-token lifetime in days
    pub refresh_days: i64,
}

impl SessionConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            access_minutes: 15,
            refresh_days: 7,
        }
    }
}

// ==================
// Claims & Pair
// ==================

/// Which half of the pair a token is; the claim keeps an access token from
/// ever being presented as a refresh token or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Signed token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub role: Role,
    #[serde(rename = "use")]
    pub token_use: TokenUse,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// The pair handed to a client on login or rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Observable lifecycle of a refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Refresh token is live
    Active,
    /// Refresh token past its expiry; re-login required
    Expired,
    /// Consumed by rotation, explicit logout, or unverifiable. Terminal.
    Revoked,
}

// ==================
// Session Manager
// ==================

pub struct SessionManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    /// Consumed refresh jtis keyed to their token's expiry; insertion is
    /// check-and-set under the write lock so concurrent rotations of one
    /// token have exactly one winner. Lapsed entries are pruned on every
    /// write, since rotation rejects an expired token before consulting
    /// the set; the map is bounded by the number of live refresh tokens.
    consumed: RwLock<HashMap<String, u64>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            consumed: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh access/refresh pair for an identity
    pub fn issue(&self, identity: &Identity) -> AuthResult<TokenPair> {
        self.mint(identity.id, identity.role)
    }

    /// Verify signature and expiry of an access token.
    ///
    /// `TokenExpired` and `InvalidToken` are distinct so the caller can
    /// choose between attempting a refresh and forcing re-login.
    pub fn validate_access(&self, token: &str) -> AuthResult<SessionClaims> {
        let claims = self.decode(token)?;
        if claims.token_use != TokenUse::Access {
            return Err(AuthError::InvalidToken(
                "not an access token".to_string(),
            ));
        }
        if claims.exp <= self.clock.unix() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a brand-new pair, consuming it.
    ///
    /// Replay of an already-rotated token is a hard failure and a
    /// potential theft signal, never a benign retry.
    pub fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.decode(refresh_token)?;
        if claims.token_use != TokenUse::Refresh {
            return Err(AuthError::InvalidToken(
                "not a refresh token".to_string(),
            ));
        }
        if claims.exp <= self.clock.unix() {
            return Err(AuthError::TokenExpired);
        }

        {
            let now = self.clock.unix();
            let mut consumed = self.consumed.write().unwrap();
            consumed.retain(|_, exp| *exp > now);
            if consumed.insert(claims.jti.clone(), claims.exp).is_some() {
                drop(consumed);
                tracing::warn!(
                    identity_id = %claims.sub,
                    "refresh token replayed after rotation; possible theft"
                );
                return Err(AuthError::InvalidToken(
                    "refresh token already used".to_string(),
                ));
            }
        }

        self.mint(claims.sub, claims.role)
    }

    /// Explicit logout: consume the refresh token's jti. Idempotent, and
    /// accepts an already-expired token (logout of a dead session is a
    /// no-op, not an error).
    pub fn revoke(&self, refresh_token: &str) -> AuthResult<()> {
        let claims = self.decode(refresh_token)?;
        if claims.token_use != TokenUse::Refresh {
            return Err(AuthError::InvalidToken(
                "not a refresh token".to_string(),
            ));
        }
        let now = self.clock.unix();
        let mut consumed = self.consumed.write().unwrap();
        consumed.retain(|_, exp| *exp > now);
        consumed.insert(claims.jti, claims.exp);
        Ok(())
    }

    /// Decode a token's claims without checking expiry or consuming
    /// anything. Diagnostic only: audit hooks use this to attribute a
    /// replayed or logged-out token to an identity.
    pub fn peek(&self, token: &str) -> AuthResult<SessionClaims> {
        self.decode(token)
    }

    /// Where a refresh token sits in its lifecycle
    pub fn refresh_state(&self, refresh_token: &str) -> SessionState {
        let claims = match self.decode(refresh_token) {
            Ok(claims) if claims.token_use == TokenUse::Refresh => claims,
            _ => return SessionState::Revoked,
        };
        if self.consumed.read().unwrap().contains_key(&claims.jti) {
            return SessionState::Revoked;
        }
        if claims.exp <= self.clock.unix() {
            return SessionState::Expired;
        }
        SessionState::Active
    }

    fn mint(&self, sub: Uuid, role: Role) -> AuthResult<TokenPair> {
        let now = self.clock.unix();
        let access = self.encode(SessionClaims {
            sub,
            role,
            token_use: TokenUse::Access,
            jti: new_jti(),
            iat: now,
            exp: now + (self.config.access_minutes * 60) as u64,
        })?;
        let refresh = self.encode(SessionClaims {
            sub,
            role,
            token_use: TokenUse::Refresh,
            jti: new_jti(),
            iat: now,
            exp: now + (self.config.refresh_days * 86_400) as u64,
        })?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
        })
    }

    fn encode(&self, claims: SessionClaims) -> AuthResult<String> {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.config.secret),
        )
        .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    fn decode(&self, token: &str) -> AuthResult<SessionClaims> {
        // Expiry is checked against the injected clock, not the system
        // clock jsonwebtoken would use.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(&self.config.secret),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Random 128-bit token id, hex-encoded
fn new_jti() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
