//! End-to-end lockout behavior through the service facade, including the
//! concurrency guarantees on the failed-attempt counter.

use std::sync::Arc;

use chrono::Duration;
use tollgate::{
    AuthConfig, AuthError, AuthService, Clock, IdentityRepository, InMemoryIdentityRepository,
    ManualClock, NewIdentity, Role,
};

fn fast_config() -> AuthConfig {
    let mut config = AuthConfig::new(*b"integration-key!");
    // Low-cost hashing so the suite stays quick
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

#[test]
fn five_failures_lock_and_sixth_fails_with_correct_password() {
    let (_repo, _clock, service) = setup();

    for i in 1..=5 {
        let err = service
            .login("jane@city.gov", "wrong password", None)
            .unwrap_err();
        match i {
            5 => assert!(matches!(err, AuthError::AccountLocked { .. })),
            _ => assert!(matches!(err, AuthError::InvalidCredentials)),
        }
    }

    // 6th attempt: correct password, still rejected with the lock error
    let err = service
        .login("jane@city.gov", "correct horse", None)
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked { .. }));
}

#[test]
fn success_below_threshold_resets_counter() {
    let (repo, _clock, service) = setup();

    for _ in 0..4 {
        let _ = service.login("jane@city.gov", "wrong password", None);
    }
    service
        .login("jane@city.gov", "correct horse", None)
        .unwrap();

    let rec = repo.find_by_email("jane@city.gov").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 0);
    assert!(rec.locked_until.is_none());
    assert!(rec.last_login_at.is_some());

    // The counter really did restart: four more failures still do not lock
    for _ in 0..4 {
        let err = service
            .login("jane@city.gov", "wrong password", None)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}

#[test]
fn fourth_to_fifth_failure_sets_lock_expiry() {
    let (repo, clock, service) = setup();

    for _ in 0..4 {
        let _ = service.login("jane@city.gov", "wrong password", None);
    }
    let rec = repo.find_by_email("jane@city.gov").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 4);
    assert!(rec.locked_until.is_none());

    let err = service
        .login("jane@city.gov", "wrong password", None)
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked { .. }));

    let rec = repo.find_by_email("jane@city.gov").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 5);
    let until = rec.locked_until.expect("lock expiry must be set");
    assert_eq!(until, clock.now() + Duration::minutes(15));
}

#[test]
fn lock_lifts_after_fifteen_minutes() {
    let (_repo, clock, service) = setup();

    for _ in 0..5 {
        let _ = service.login("jane@city.gov", "wrong password", None);
    }
    clock.advance(Duration::minutes(14));
    assert!(matches!(
        service.login("jane@city.gov", "correct horse", None),
        Err(AuthError::AccountLocked { .. })
    ));

    clock.advance(Duration::minutes(2));
    service
        .login("jane@city.gov", "correct horse", None)
        .unwrap();
}

#[test]
fn concurrent_failures_are_never_lost() {
    let (repo, _clock, service) = setup();
    let service = Arc::new(service);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let _ = service.login("jane@city.gov", "wrong password", None);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rec = repo.find_by_email("jane@city.gov").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 4);
}

#[test]
fn locked_account_check_precedes_password_work() {
    let (repo, _clock, service) = setup();

    for _ in 0..5 {
        let _ = service.login("jane@city.gov", "wrong password", None);
    }

    // Further attempts while locked do not move the counter, with either
    // a wrong or a correct password
    let _ = service.login("jane@city.gov", "wrong password", None);
    let _ = service.login("jane@city.gov", "correct horse", None);

    let rec = repo.find_by_email("jane@city.gov").unwrap().unwrap();
    assert_eq!(rec.failed_attempts, 5);
}

#[test]
fn inactive_account_cannot_login() {
    let (repo, _clock, service) = setup();
    let id = repo.find_by_email("jane@city.gov").unwrap().unwrap().id;
    repo.update_with(id, &mut |rec| rec.active = false).unwrap();

    assert!(matches!(
        service.login("jane@city.gov", "correct horse", None),
        Err(AuthError::InvalidCredentials)
    ));
}
