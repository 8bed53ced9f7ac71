//! Behaviour of the access layer when Redis is configured but unreachable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use guestkey::access::ValidationReason;
use guestkey::lock::LoggingLockDriver;
use guestkey::metrics::Metrics;
use guestkey::models::access::{AccessType, NewGrantRequest};
use guestkey::notification::dispatch::{DeliveryConfig, WebhookDispatcher};
use guestkey::notification::slack::SlackNotifier;
use guestkey::state::resilient::ResilientOptions;
use guestkey::state::{BackendMode, ResilientBackend, StateBackend};
use guestkey::store::MemoryStore;
use guestkey::{AccessControl, AccessControlSettings, AppError};

const UNREACHABLE_REDIS: &str = "redis://127.0.0.1:1/";

fn options(fallback_enabled: bool) -> ResilientOptions {
    ResilientOptions {
        fallback_enabled,
        max_memory_entries: 1024,
        probe_interval: Duration::from_secs(3600),
        connect_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_access_layer_keeps_working_on_memory_fallback() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let backend =
        ResilientBackend::connect(Some(UNREACHABLE_REDIS), options(true), Some(metrics.clone()))
            .await;
    assert!(backend.is_degraded());
    assert_eq!(backend.mode(), BackendMode::Memory);

    let store = MemoryStore::new();
    let (webhooks, _pool) = WebhookDispatcher::new(
        Arc::new(store.clone()),
        DeliveryConfig::default(),
        metrics.clone(),
        None,
    )
    .unwrap();
    let control = AccessControl::new(
        Arc::new(backend),
        Arc::new(store),
        Arc::new(LoggingLockDriver::new()),
        Arc::new(SlackNotifier::new(None, Duration::from_secs(5)).unwrap()),
        webhooks,
        metrics,
        AccessControlSettings {
            code_hash_iterations: 1_000,
            validate_rate_limit: 1,
            validate_rate_window: 60,
        },
    );

    let issued = control
        .issue_access(NewGrantRequest {
            property_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            access_type: AccessType::Temporary,
            start_date: Utc::now() - chrono::Duration::minutes(1),
            end_date: Utc::now() + chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    let first = control
        .validate_code_for("kiosk-1", &issued.code, issued.grant.property_id)
        .await
        .unwrap();
    assert!(first.valid);
    let throttled = control
        .validate_code_for("kiosk-1", &issued.code, issued.grant.property_id)
        .await;
    assert!(matches!(throttled, Err(AppError::RateLimited { .. })));

    control.revoke_token("session-abc").await.unwrap();
    assert!(control.is_token_revoked("session-abc").await.unwrap());

    control
        .revoke_access(issued.grant.id, Uuid::new_v4())
        .await
        .unwrap();
    let after = control
        .validate_code(&issued.code, issued.grant.property_id)
        .await
        .unwrap();
    assert_eq!(after.reason, Some(ValidationReason::CodeInvalid));
}

#[tokio::test]
async fn test_strict_mode_fails_closed() {
    let backend =
        ResilientBackend::connect(Some(UNREACHABLE_REDIS), options(false), None).await;
    let store = MemoryStore::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let (webhooks, _pool) = WebhookDispatcher::new(
        Arc::new(store.clone()),
        DeliveryConfig::default(),
        metrics.clone(),
        None,
    )
    .unwrap();
    let control = AccessControl::new(
        Arc::new(backend),
        Arc::new(store),
        Arc::new(LoggingLockDriver::new()),
        Arc::new(SlackNotifier::new(None, Duration::from_secs(5)).unwrap()),
        webhooks,
        metrics,
        AccessControlSettings::default(),
    );

    // revocation checks never answer "not revoked" when state is unknown
    let revoked = control.is_token_revoked("session-abc").await;
    assert!(matches!(revoked, Err(AppError::StateUnavailable(_))));

    let limited = control.check_rate_limit("login:bob", 60, 5).await;
    assert!(matches!(limited, Err(AppError::StateUnavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_entries_expire_with_their_ttl() {
    let backend =
        ResilientBackend::connect(Some(UNREACHABLE_REDIS), options(true), None).await;
    assert!(backend.is_degraded());

    backend.set("session:guest", "1".into(), 1).await.unwrap();
    assert_eq!(backend.get("session:guest").await.unwrap().as_deref(), Some("1"));

    tokio::time::advance(Duration::from_millis(1_100)).await;
    assert_eq!(backend.get("session:guest").await.unwrap(), None);
}
