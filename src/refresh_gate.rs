//! # Single-Flight Refresh Gate
//!
//! Client-side companion to the session coordinator. A consumer holding
//! one refresh token must not fire N parallel rotations when N requests
//! fail at once: rotation is single-use, so the races would all but one
//! die with `InvalidToken`. The gate serializes rotation behind an async
//! mutex; the first rejected caller rotates, the rest wait and pick up the
//! fresh access token. A failed or timed-out rotation clears the cached
//! pair (fail closed) so every waiter is forced to re-authenticate.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::{AuthError, AuthResult};
use crate::session::TokenPair;

struct GateState {
    /// `None` means no usable session: re-authentication required
    pair: Option<TokenPair>,
}

pub struct RefreshGate {
    state: Mutex<GateState>,
    /// Deadline for one rotation attempt; on expiry the gate fails closed
    timeout: Duration,
}

impl RefreshGate {
    pub fn new(initial: TokenPair) -> Self {
        Self::with_timeout(initial, Duration::from_secs(10))
    }

    pub fn with_timeout(initial: TokenPair, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(GateState {
                pair: Some(initial),
            }),
            timeout,
        }
    }

    /// Current access token, if the session is still usable
    pub async fn current_access(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.pair.as_ref().map(|p| p.access_token.clone())
    }

    /// Replace the cached pair after a fresh login
    pub async fn install(&self, pair: TokenPair) {
        self.state.lock().await.pair = Some(pair);
    }

    /// Drop the cached pair (local logout)
    pub async fn clear(&self) {
        self.state.lock().await.pair = None;
    }

    /// Obtain a usable access token after `rejected_access` came back as
    /// expired. At most one rotation runs per gate at a time:
    ///
    /// - if the cached access token already differs from the rejected one,
    ///   another caller rotated first; reuse it without a second rotation,
    /// - otherwise run `rotate` under the gate with the configured
    ///   deadline. Failure or timeout clears the cache and propagates the
    ///   error to this caller and, via the cleared cache, to every waiter.
    pub async fn refresh<F, Fut>(&self, rejected_access: &str, rotate: F) -> AuthResult<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = AuthResult<TokenPair>>,
    {
        let mut state = self.state.lock().await;

        let pair = state.pair.as_ref().ok_or_else(|| {
            AuthError::InvalidToken("session cleared; re-authentication required".to_string())
        })?;

        if pair.access_token != rejected_access {
            // A concurrent caller already rotated while we waited
            return Ok(pair.access_token.clone());
        }

        let refresh_token = pair.refresh_token.clone();
        match tokio::time::timeout(self.timeout, rotate(refresh_token)).await {
            Ok(Ok(new_pair)) => {
                let access = new_pair.access_token.clone();
                state.pair = Some(new_pair);
                Ok(access)
            }
            Ok(Err(err)) => {
                state.pair = None;
                Err(err)
            }
            Err(_elapsed) => {
                state.pair = None;
                Err(AuthError::InvalidToken(
                    "session refresh timed out".to_string(),
                ))
            }
        }
    }
}
