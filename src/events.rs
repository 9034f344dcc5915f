//! # Auth Event Hooks
//!
//! The surrounding portal logs security events (audit trail, alerting on
//! refresh-token reuse) but lives outside this crate. Hooks give it the
//! feed: handlers registered per event fire after the fact and can never
//! block or fail the auth flow itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::AuthResult;

/// Auth event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    PasswordResetRequested,
    PasswordRotated,
    EmailVerified,
    SecondFactorEnrolled,
    SecondFactorConfirmed,
    SecondFactorDisabled,
    SessionRotated,
    RefreshReuseDetected,
    LoggedOut,
}

/// What handlers receive. Never contains hashes, secrets, or live token
/// values; `metadata` is for contextual fields like the remaining lock
/// duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEventPayload {
    pub event: AuthEvent,
    pub identity_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl AuthEventPayload {
    pub fn new(event: AuthEvent, identity_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            identity_id,
            timestamp,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Hook handler trait
pub trait AuthEventHandler: Send + Sync {
    fn handle(&self, payload: &AuthEventPayload) -> AuthResult<()>;
}

/// Registry of event handlers
pub struct AuthHooks {
    handlers: RwLock<Vec<(AuthEvent, Box<dyn AuthEventHandler>)>>,
}

impl AuthHooks {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for an event
    pub fn on(&self, event: AuthEvent, handler: Box<dyn AuthEventHandler>) {
        let mut handlers = self.handlers.write().unwrap();
        handlers.push((event, handler));
    }

    /// Fire handlers for an event. Handler errors are dropped; hooks never
    /// fail the auth flow.
    pub fn trigger(&self, payload: &AuthEventPayload) {
        let handlers = self.handlers.read().unwrap();
        for (event, handler) in handlers.iter() {
            if *event == payload.event {
                let _ = handler.handle(payload);
            }
        }
    }
}

impl Default for AuthHooks {
    fn default() -> Self {
        Self::new()
    }
}
