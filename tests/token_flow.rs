//! Ephemeral-token, second-factor, and session flows through the facade,
//! plus the client-side single-flight refresh behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tollgate::second_factor::generate_code;
use tollgate::{
    AuthConfig, AuthError, AuthService, Clock, IdentityRepository, InMemoryIdentityRepository,
    ManualClock, NewIdentity, RefreshGate, Role, TokenKind, TokenDelivery, TotpConfig,
};

fn fast_config() -> AuthConfig {
    let mut config = AuthConfig::new(*b"integration-key!");
    config.credentials.memory_kib = 1024;
    config.credentials.iterations = 1;
    config
}

fn setup() -> (
    Arc<InMemoryIdentityRepository>,
    Arc<ManualClock>,
    AuthService<InMemoryIdentityRepository>,
) {
    let repo = Arc::new(InMemoryIdentityRepository::new());
    let clock = Arc::new(ManualClock::at_now());
    let service = AuthService::new(Arc::clone(&repo), Arc::clone(&clock) as Arc<dyn Clock>, fast_config());
    service
        .register(NewIdentity {
            email: "jane@city.gov".to_string(),
            phone: "+15550001111".to_string(),
            license: None,
            password: "correct horse".to_string(),
            role: Role::Citizen,
        })
        .unwrap();
    (repo, clock, service)
}

// ==================
// Ephemeral Tokens
// ==================

/// Captures tokens the way the portal's mailer would receive them
struct CapturingDelivery {
    tokens: Mutex<Vec<(String, TokenKind, String)>>,
}

impl CapturingDelivery {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn last(&self) -> (String, TokenKind, String) {
        self.tokens.lock().unwrap().last().cloned().unwrap()
    }
}

impl TokenDelivery for CapturingDelivery {
    fn deliver(&self, email: &str, kind: TokenKind, token: &str) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .unwrap()
            .push((email.to_string(), kind, token.to_string()));
        Ok(())
    }
}

#[test]
fn reset_token_reaches_delivery_and_is_single_use() {
    let repo = Arc::new(InMemoryIdentityRepository::new());
    let clock = Arc::new(ManualClock::at_now());
    let delivery = Arc::new(CapturingDelivery::new());
    let service = AuthService::new(Arc::clone(&repo), Arc::clone(&clock) as Arc<dyn Clock>, fast_config())
        .with_delivery(Arc::clone(&delivery) as Arc<dyn TokenDelivery>);
    service
        .register(NewIdentity {
            email: "jane@city.gov".to_string(),
            phone: "+15550001111".to_string(),
            license: None,
            password: "correct horse".to_string(),
            role: Role::Citizen,
        })
        .unwrap();

    service.request_password_reset("jane@city.gov").unwrap();
    let (email, kind, token) = delivery.last();
    assert_eq!(email, "jane@city.gov");
    assert_eq!(kind, TokenKind::Reset);

    service.reset_password(&token, "battery staple").unwrap();
    assert!(matches!(
        service.reset_password(&token, "another pass"),
        Err(AuthError::TokenNotFound)
    ));
}

#[test]
fn second_reset_request_invalidates_first_token() {
    let (repo, _clock, service) = setup();
    let id = repo.find_by_email("jane@city.gov").unwrap().unwrap().id;

    service.request_password_reset("jane@city.gov").unwrap();
    let first = repo.find_by_id(id).unwrap().unwrap().reset_token.unwrap();

    service.request_password_reset("jane@city.gov").unwrap();
    let second = repo.find_by_id(id).unwrap().unwrap().reset_token.unwrap();
    assert_ne!(first, second);

    assert!(matches!(
        service.reset_password(&first, "battery staple"),
        Err(AuthError::TokenNotFound)
    ));
    service.reset_password(&second, "battery staple").unwrap();
}

#[test]
fn verification_token_never_satisfies_reset() {
    let (repo, _clock, service) = setup();
    let id = repo.find_by_email("jane@city.gov").unwrap().unwrap().id;

    service.request_email_verification(id).unwrap();
    let verification = repo
        .find_by_id(id)
        .unwrap()
        .unwrap()
        .verification_token
        .unwrap();

    assert!(matches!(
        service.reset_password(&verification, "battery staple"),
        Err(AuthError::TokenNotFound)
    ));

    service.request_password_reset("jane@city.gov").unwrap();
    let reset = repo.find_by_id(id).unwrap().unwrap().reset_token.unwrap();
    assert!(matches!(
        service.verify_email(&reset),
        Err(AuthError::TokenNotFound)
    ));

    // Both still valid for their own flows
    service.verify_email(&verification).unwrap();
    service.reset_password(&reset, "battery staple").unwrap();
}

#[test]
fn reset_token_expires_after_thirty_minutes() {
    let (repo, clock, service) = setup();
    let id = repo.find_by_email("jane@city.gov").unwrap().unwrap().id;

    service.request_password_reset("jane@city.gov").unwrap();
    let token = repo.find_by_id(id).unwrap().unwrap().reset_token.unwrap();

    clock.advance(Duration::minutes(31));
    assert!(matches!(
        service.reset_password(&token, "battery staple"),
        Err(AuthError::TokenExpired)
    ));
}

#[test]
fn rotating_password_invalidates_outstanding_reset_token() {
    let (repo, _clock, service) = setup();
    let id = repo.find_by_email("jane@city.gov").unwrap().unwrap().id;

    service.request_password_reset("jane@city.gov").unwrap();
    let token = repo.find_by_id(id).unwrap().unwrap().reset_token.unwrap();

    // User changes their password through the regular authenticated flow
    service
        .credentials()
        .rotate_password(id, "battery staple")
        .unwrap();

    assert!(matches!(
        service.reset_password(&token, "third password"),
        Err(AuthError::TokenNotFound)
    ));
}

// ==================
// Second Factor
// ==================

#[test]
fn enroll_confirm_and_code_window() {
    let (_repo, clock, service) = setup();
    let id = service
        .credentials()
        .find_by_email("jane@city.gov")
        .unwrap()
        .unwrap()
        .id;

    let enrollment = service.enable_second_factor(id).unwrap();
    assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));

    let code = generate_code(&enrollment.secret, clock.unix(), &TotpConfig::default()).unwrap();
    service.confirm_second_factor(id, &code).unwrap();

    // Fresh code logs in
    let code = generate_code(&enrollment.secret, clock.unix(), &TotpConfig::default()).unwrap();
    service
        .login("jane@city.gov", "correct horse", Some(&code))
        .unwrap();

    // Two steps later the same code falls outside the ±1 tolerance
    clock.advance(Duration::seconds(60));
    assert!(matches!(
        service.login("jane@city.gov", "correct horse", Some(&code)),
        Err(AuthError::InvalidCredentials)
    ));
}

#[test]
fn confirm_with_stale_code_fails_invalid_code() {
    let (_repo, clock, service) = setup();
    let id = service
        .credentials()
        .find_by_email("jane@city.gov")
        .unwrap()
        .unwrap()
        .id;

    let enrollment = service.enable_second_factor(id).unwrap();
    let code = generate_code(&enrollment.secret, clock.unix(), &TotpConfig::default()).unwrap();

    clock.advance(Duration::seconds(60));
    assert!(matches!(
        service.confirm_second_factor(id, &code),
        Err(AuthError::InvalidCode)
    ));

    // Pending secret survived; a current code still confirms
    let code = generate_code(&enrollment.secret, clock.unix(), &TotpConfig::default()).unwrap();
    service.confirm_second_factor(id, &code).unwrap();
}

// ==================
// Session Rotation
// ==================

#[test]
fn simultaneous_refresh_calls_have_one_winner() {
    let (_repo, _clock, service) = setup();
    let service = Arc::new(service);
    let pair = service
        .login("jane@city.gov", "correct horse", None)
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            let token = pair.refresh_token.clone();
            std::thread::spawn(move || service.refresh_session(&token))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AuthError::InvalidToken(_)))));
}

// ==================
// Single-Flight Refresh Gate
// ==================

#[tokio::test]
async fn gate_shares_one_rotation_across_concurrent_failures() {
    let (_repo, clock, service) = setup();
    let service = Arc::new(service);
    let pair = service
        .login("jane@city.gov", "correct horse", None)
        .unwrap();
    let stale_access = pair.access_token.clone();
    let gate = Arc::new(RefreshGate::new(pair));

    // Access token ages out; every in-flight request now fails at once
    clock.advance(Duration::minutes(16));
    let rotations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let gate = Arc::clone(&gate);
        let service = Arc::clone(&service);
        let rotations = Arc::clone(&rotations);
        let stale = stale_access.clone();
        handles.push(tokio::spawn(async move {
            gate.refresh(&stale, move |refresh_token| {
                let service = Arc::clone(&service);
                let rotations = Arc::clone(&rotations);
                async move {
                    rotations.fetch_add(1, Ordering::SeqCst);
                    service.refresh_session(&refresh_token)
                }
            })
            .await
        }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap());
    }

    // One rotation served all six callers with the same fresh token
    assert_eq!(rotations.load(Ordering::SeqCst), 1);
    assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    service.validate_access(&tokens[0]).unwrap();
}

#[tokio::test]
async fn gate_fails_all_waiters_when_rotation_fails() {
    let (_repo, _clock, service) = setup();
    let service = Arc::new(service);
    let pair = service
        .login("jane@city.gov", "correct horse", None)
        .unwrap();

    // The refresh token was already consumed elsewhere (stolen-token race)
    service.refresh_session(&pair.refresh_token).unwrap();

    let stale_access = pair.access_token.clone();
    let gate = RefreshGate::new(pair);

    let result = gate
        .refresh(&stale_access, |refresh_token| {
            let service = Arc::clone(&service);
            async move { service.refresh_session(&refresh_token) }
        })
        .await;
    assert!(matches!(result, Err(AuthError::InvalidToken(_))));

    // Cache cleared: the session is gone until a fresh login installs one
    assert!(gate.current_access().await.is_none());
}
