//! tollgate - credential and session security for the municipal
//! traffic-fines portal
//!
//! The portal's CRUD layers (violation search, payments, reporting) call
//! into this crate for everything touching credentials: password
//! lifecycle, brute-force lockout, second-factor enrollment, single-use
//! reset/verification tokens, and access/refresh session pairs.

pub mod clock;
pub mod credentials;
pub mod ephemeral;
pub mod errors;
pub mod events;
pub mod identity;
pub mod lockout;
pub mod refresh_gate;
pub mod second_factor;
pub mod service;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialConfig, CredentialStore, NewIdentity};
pub use ephemeral::{TokenConfig, TokenIssuer, TokenKind};
pub use errors::{AuthError, AuthResult};
pub use events::{AuthEvent, AuthEventHandler, AuthEventPayload, AuthHooks};
pub use identity::{Identity, IdentityRepository, InMemoryIdentityRepository, Role};
pub use lockout::{LockState, LockoutConfig, LockoutGuard};
pub use refresh_gate::RefreshGate;
pub use second_factor::{Enrollment, SecondFactorService, TotpConfig};
pub use service::{AuthConfig, AuthService, TokenDelivery};
pub use session::{
    SessionClaims, SessionConfig, SessionManager, SessionState, TokenPair, TokenUse,
};
