//! # Identity Record & Repository
//!
//! The one shared mutable resource of the subsystem: the per-user identity
//! record with its security fields. All mutation goes through
//! [`IdentityRepository::update_with`], an atomic read-modify-write keyed
//! by id, so counter increments and token clear-on-use never race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::{AuthError, AuthResult};

// ==================
// Role
// ==================

/// Closed set of portal roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Looks up and pays their own fines
    Citizen,
    /// Issues and manages violations
    Enforcer,
    /// Full administrative access
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Citizen => write!(f, "citizen"),
            Role::Enforcer => write!(f, "enforcer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

// ==================
// Identity Record
// ==================

/// A portal account and its security fields.
///
/// Serialization skips the password hash, both TOTP secrets, and the live
/// ephemeral token values, so a serialized identity can cross the API
/// boundary without leaking credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    /// Stored lowercase; all lookups are case-insensitive
    pub email: String,
    /// E.164-like, e.g. +15551234567
    pub phone: String,
    /// Driver-license number, unique when present
    pub license: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    /// True only after a confirmed enrollment
    pub totp_enabled: bool,
    /// Present iff `totp_enabled`
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    /// Enrollment in progress, not yet confirmed
    #[serde(skip_serializing)]
    pub totp_pending_secret: Option<String>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    pub reset_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================
// Repository Trait
// ==================

/// Persistence seam for identity records.
///
/// `update_with` is the only mutation primitive besides `create`: the
/// mutator runs while the implementation holds whatever exclusivity it has
/// for that record (write lock here, row lock in a real store). Callers
/// must keep mutators cheap: hash passwords *before* calling, never
/// inside.
pub trait IdentityRepository: Send + Sync {
    /// Persist a new record; `Conflict` if email, phone, or license is taken
    fn create(&self, identity: Identity) -> AuthResult<Identity>;

    fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>>;

    /// Case-insensitive email lookup
    fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>>;

    fn find_by_phone(&self, phone: &str) -> AuthResult<Option<Identity>>;

    fn find_by_license(&self, license: &str) -> AuthResult<Option<Identity>>;

    /// First identity matching a predicate (token scans)
    fn find_where(&self, pred: &dyn Fn(&Identity) -> bool) -> AuthResult<Option<Identity>>;

    /// Atomic read-modify-write on one record; returns the updated snapshot.
    /// `IdentityNotFound` if the id does not exist.
    fn update_with(
        &self,
        id: Uuid,
        mutate: &mut dyn FnMut(&mut Identity),
    ) -> AuthResult<Identity>;
}

// ==================
// In-Memory Repository
// ==================

/// In-memory identity repository for tests and single-node deployments.
///
/// One `RwLock` over the whole map: `update_with` takes the write lock for
/// the duration of the mutator, which is what makes increment-and-maybe-lock
/// and clear-on-use atomic.
pub struct InMemoryIdentityRepository {
    records: RwLock<HashMap<Uuid, Identity>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIdentityRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRepository for InMemoryIdentityRepository {
    fn create(&self, identity: Identity) -> AuthResult<Identity> {
        let mut records = self.records.write().unwrap();

        for existing in records.values() {
            if existing.email.eq_ignore_ascii_case(&identity.email) {
                return Err(AuthError::Conflict("email already registered".to_string()));
            }
            if existing.phone == identity.phone {
                return Err(AuthError::Conflict("phone already registered".to_string()));
            }
            if let (Some(a), Some(b)) = (&existing.license, &identity.license) {
                if a == b {
                    return Err(AuthError::Conflict(
                        "license already registered".to_string(),
                    ));
                }
            }
        }

        records.insert(identity.id, identity.clone());
        Ok(identity)
    }

    fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        let records = self.records.read().unwrap();
        Ok(records.get(&id).cloned())
    }

    fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .find(|r| r.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn find_by_phone(&self, phone: &str) -> AuthResult<Option<Identity>> {
        let records = self.records.read().unwrap();
        Ok(records.values().find(|r| r.phone == phone).cloned())
    }

    fn find_by_license(&self, license: &str) -> AuthResult<Option<Identity>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .find(|r| r.license.as_deref() == Some(license))
            .cloned())
    }

    fn find_where(&self, pred: &dyn Fn(&Identity) -> bool) -> AuthResult<Option<Identity>> {
        let records = self.records.read().unwrap();
        Ok(records.values().find(|r| pred(r)).cloned())
    }

    fn update_with(
        &self,
        id: Uuid,
        mutate: &mut dyn FnMut(&mut Identity),
    ) -> AuthResult<Identity> {
        let mut records = self.records.write().unwrap();
        let record = records.get_mut(&id).ok_or(AuthError::IdentityNotFound)?;
        mutate(record);
        Ok(record.clone())
    }
}
