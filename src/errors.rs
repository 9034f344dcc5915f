//! # Auth Error Types
//!
//! Typed failures for the credential and session security subsystem.
//! Every operation boundary returns one of these; nothing is silently
//! swallowed.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Auth error taxonomy
///
/// Callers branch on these variants to decide between "fix your input"
/// (`Validation`, `Conflict`), "wait" (`AccountLocked`), "ask to resend"
/// (`TokenExpired`, `TokenNotFound`), and "force re-login"
/// (`InvalidToken`).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input; the caller can correct and retry
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique-field collision (email, phone, or license already taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Account is temporarily frozen after repeated failures.
    ///
    /// The message is deliberately independent of the attempt count so a
    /// locked response never leaks how many failures occurred.
    #[error("Account is temporarily locked. Try again in {remaining_secs} seconds")]
    AccountLocked {
        /// Seconds until the lock lifts
        remaining_secs: i64,
    },

    /// Wrong password or second-factor code.
    ///
    /// Deliberately generic: never reveals which factor was wrong.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Ephemeral token exists but its expiry has passed
    #[error("Token has expired")]
    TokenExpired,

    /// No live ephemeral token matches (unknown, already consumed, or
    /// superseded by a newer issuance)
    #[error("Token not found")]
    TokenNotFound,

    /// Session token failed verification, or a refresh token was replayed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Second-factor code rejected
    #[error("Invalid second-factor code")]
    InvalidCode,

    /// Identity lookup miss on an operation that requires one.
    ///
    /// Login maps this to `InvalidCredentials` before it crosses the
    /// boundary, so unknown accounts are indistinguishable from wrong
    /// passwords.
    #[error("Identity not found")]
    IdentityNotFound,

    /// Hashing or encoding backend failure
    #[error("Internal auth failure: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::InvalidCode => "INVALID_CODE",
            Self::IdentityNotFound => "IDENTITY_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the surrounding layer should map this to
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::AccountLocked { .. } => 423,
            Self::InvalidCredentials => 401,
            Self::TokenExpired => 401,
            Self::TokenNotFound => 404,
            Self::InvalidToken(_) => 401,
            Self::InvalidCode => 401,
            Self::IdentityNotFound => 404,
            Self::Internal(_) => 500,
        }
    }
}
