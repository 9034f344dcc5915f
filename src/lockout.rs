//! # Lockout Guard
//!
//! Per-identity brute-force protection: a failed-attempt counter that
//! freezes the account for a fixed window once it reaches the threshold.
//!
//! The guard runs *before* password verification so a locked account never
//! pays the hashing cost and never leaks, through timing, whether the lock
//! or the password was the reason for rejection. The increment-and-maybe-
//! lock transition happens inside one atomic repository update; concurrent
//! failures for the same account can never under-count.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AuthError, AuthResult};
use crate::identity::{Identity, IdentityRepository};

// ==================
// Configuration
// ==================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failures that trigger a lock
    pub max_failed_attempts: u32,
    /// How long a lock lasts
    pub lock_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lock_minutes: 15,
        }
    }
}

// ==================
// Lock State
// ==================

/// Where an identity sits in the lockout state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No recorded failures
    Open,
    /// Some failures, below the threshold
    Warned { failures: u32 },
    /// Threshold reached; rejected until the window lapses
    Locked { remaining: Duration },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }
}

// ==================
// Lockout Guard
// ==================

pub struct LockoutGuard<R: IdentityRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    config: LockoutConfig,
}

impl<R: IdentityRepository> LockoutGuard<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: LockoutConfig) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    /// Derive the current state of a record. An elapsed `locked_until`
    /// reads as not locked; the counter resets lazily on the next success.
    pub fn state(&self, identity: &Identity) -> LockState {
        if let Some(until) = identity.locked_until {
            let now = self.clock.now();
            if until > now {
                return LockState::Locked {
                    remaining: until - now,
                };
            }
        }
        match identity.failed_attempts {
            0 => LockState::Open,
            n => LockState::Warned { failures: n },
        }
    }

    /// Gate an authentication attempt. Must run before any password or
    /// second-factor check.
    pub fn ensure_unlocked(&self, identity: &Identity) -> AuthResult<()> {
        match self.state(identity) {
            LockState::Locked { remaining } => Err(AuthError::AccountLocked {
                remaining_secs: remaining.num_seconds().max(1),
            }),
            LockState::Open | LockState::Warned { .. } => Ok(()),
        }
    }

    /// Record a failed attempt atomically and return the resulting state.
    ///
    /// The threshold-crossing failure sets the lock inside the same
    /// repository update that increments the counter. Attempts against an
    /// already-locked record do not re-increment.
    pub fn record_failure(&self, id: Uuid) -> AuthResult<LockState> {
        let now = self.clock.now();
        let threshold = self.config.max_failed_attempts;
        let lock_for = Duration::minutes(self.config.lock_minutes);

        let updated = self.repo.update_with(id, &mut |rec| {
            let already_locked = rec.locked_until.map(|until| until > now).unwrap_or(false);
            if already_locked {
                return;
            }
            // A lapsed lock means this failure starts a fresh count.
            if rec.locked_until.is_some() {
                rec.locked_until = None;
                rec.failed_attempts = 0;
            }
            rec.failed_attempts += 1;
            if rec.failed_attempts >= threshold {
                rec.locked_until = Some(now + lock_for);
            }
            rec.updated_at = now;
        })?;

        let state = self.state(&updated);
        if state.is_locked() {
            tracing::warn!(
                identity_id = %id,
                failures = updated.failed_attempts,
                "account locked after repeated failed logins"
            );
        }
        Ok(state)
    }

    /// Record a successful authentication: zero the counter, clear the
    /// lock, stamp last login. Callers must have passed `ensure_unlocked`.
    pub fn record_success(&self, id: Uuid) -> AuthResult<()> {
        let now = self.clock.now();
        self.repo.update_with(id, &mut |rec| {
            rec.failed_attempts = 0;
            rec.locked_until = None;
            rec.last_login_at = Some(now);
            rec.updated_at = now;
        })?;
        Ok(())
    }
}
