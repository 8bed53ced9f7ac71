//! End-to-end grant lifecycle over the in-memory adapters.
//!
//! No external services are required: grants live in `MemoryStore` and state
//! in a memory-only `ResilientBackend`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use guestkey::access::ValidationReason;
use guestkey::lock::{LockStatus, LoggingLockDriver};
use guestkey::metrics::Metrics;
use guestkey::models::access::{AccessType, NewGrantRequest};
use guestkey::notification::dispatch::{DeliveryConfig, DeliveryWorkerPool, WebhookDispatcher};
use guestkey::notification::slack::SlackNotifier;
use guestkey::state::ResilientBackend;
use guestkey::store::{GrantRepository, MemoryStore, NewWebhookEndpoint, WebhookEndpointRepository};
use guestkey::{AccessControl, AccessControlSettings, AppError};

struct Harness {
    control: AccessControl,
    store: MemoryStore,
    lock: LoggingLockDriver,
    metrics: Arc<Metrics>,
    // kept alive so the queue stays open; never spawned
    _pool: DeliveryWorkerPool,
}

fn harness(settings: AccessControlSettings) -> Harness {
    let store = MemoryStore::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let lock = LoggingLockDriver::new();
    let (webhooks, pool) = WebhookDispatcher::new(
        Arc::new(store.clone()),
        DeliveryConfig::default(),
        metrics.clone(),
        None,
    )
    .unwrap();

    let control = AccessControl::new(
        Arc::new(ResilientBackend::memory_only(4096)),
        Arc::new(store.clone()),
        Arc::new(lock.clone()),
        Arc::new(SlackNotifier::new(None, std::time::Duration::from_secs(5)).unwrap()),
        webhooks,
        metrics.clone(),
        settings,
    );
    Harness {
        control,
        store,
        lock,
        metrics,
        _pool: pool,
    }
}

fn fast_settings() -> AccessControlSettings {
    AccessControlSettings {
        code_hash_iterations: 1_000,
        ..AccessControlSettings::default()
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_not_started_then_valid_then_revoked() {
        let h = harness(fast_settings());
        let now = Utc::now();
        let issued = h
            .control
            .issue_access(NewGrantRequest {
                property_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                access_type: AccessType::Temporary,
                start_date: now + Duration::hours(1),
                end_date: now + Duration::hours(3),
            })
            .await
            .unwrap();
        let property = issued.grant.property_id;
        assert_eq!(issued.code.len(), 6);
        assert!(!issued.code.starts_with('0'));

        let early = h.control.validate_code(&issued.code, property).await.unwrap();
        assert!(!early.valid);
        assert_eq!(early.reason, Some(ValidationReason::NotStarted));

        // move the window open, as an owner editing the booking would
        let mut grant = h.store.find_grant_by_id(issued.grant.id).await.unwrap().unwrap();
        grant.start_date = now - Duration::minutes(1);
        h.store.put_grant(grant).await;
        h.control.invalidate_property(property).await;

        let open = h.control.validate_code(&issued.code, property).await.unwrap();
        assert!(open.valid);
        assert_eq!(open.access_id, Some(issued.grant.id));
        assert_eq!(open.user_id, Some(issued.grant.user_id));

        let admin = Uuid::new_v4();
        h.control.revoke_access(issued.grant.id, admin).await.unwrap();

        let after = h.control.validate_code(&issued.code, property).await.unwrap();
        assert_eq!(after.reason, Some(ValidationReason::CodeInvalid));
        assert!(h
            .control
            .is_token_revoked(&issued.grant.id.to_string())
            .await
            .unwrap());

        let stored = h.store.find_grant_by_id(issued.grant.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.revoked_by, Some(admin));
    }

    #[tokio::test]
    async fn test_expired_grant_reports_expired() {
        let h = harness(fast_settings());
        let issued = h
            .control
            .issue_access(NewGrantRequest {
                property_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                access_type: AccessType::Permanent,
                start_date: Utc::now() - Duration::days(2),
                end_date: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();

        let mut grant = issued.grant.clone();
        grant.end_date = Utc::now() - Duration::hours(1);
        h.store.put_grant(grant.clone()).await;
        h.control.invalidate_property(grant.property_id).await;

        let result = h
            .control
            .validate_code(&issued.code, grant.property_id)
            .await
            .unwrap();
        assert_eq!(result.reason, Some(ValidationReason::Expired));
        assert_eq!(h.metrics.validation_outcomes("EXPIRED"), 1);
    }

    #[tokio::test]
    async fn test_code_for_one_property_does_not_open_another() {
        let h = harness(fast_settings());
        let issued = h
            .control
            .issue_access(NewGrantRequest {
                property_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                access_type: AccessType::Temporary,
                start_date: Utc::now() - Duration::minutes(5),
                end_date: Utc::now() + Duration::hours(5),
            })
            .await
            .unwrap();

        let elsewhere = h
            .control
            .validate_code(&issued.code, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(elsewhere.reason, Some(ValidationReason::CodeInvalid));
    }
}

mod throttling {
    use super::*;

    #[tokio::test]
    async fn test_validate_code_for_is_rate_limited_per_actor() {
        let h = harness(AccessControlSettings {
            validate_rate_limit: 2,
            validate_rate_window: 60,
            ..fast_settings()
        });
        let property = Uuid::new_v4();

        for _ in 0..2 {
            let r = h
                .control
                .validate_code_for("10.0.0.1", "123456", property)
                .await
                .unwrap();
            assert_eq!(r.reason, Some(ValidationReason::CodeInvalid));
        }
        let err = h
            .control
            .validate_code_for("10.0.0.1", "123456", property)
            .await
            .unwrap_err();
        match err {
            AppError::RateLimited { reset_secs } => assert!((1..=60).contains(&reset_secs)),
            other => panic!("expected rate limit, got {other:?}"),
        }

        // a different actor has its own budget
        assert!(h
            .control
            .validate_code_for("10.0.0.2", "123456", property)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_check_rate_limit_reports_remaining() {
        let h = harness(fast_settings());
        let first = h.control.check_rate_limit("login:alice", 60, 3).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.count, 1);
        assert_eq!(first.remaining, 2);
    }
}

mod tokens {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[tokio::test]
    async fn test_revoke_opaque_and_jwt_tokens() {
        let h = harness(fast_settings());
        assert!(!h.control.is_token_revoked("opaque-session").await.unwrap());
        h.control.revoke_token("opaque-session").await.unwrap();
        assert!(h.control.is_token_revoked("opaque-session").await.unwrap());

        let jwt = jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                sub: "guest".into(),
                exp: (Utc::now() + Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        h.control.revoke_token(&jwt).await.unwrap();
        assert!(h.control.is_token_revoked(&jwt).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_jwt_is_not_stored() {
        let h = harness(fast_settings());
        let jwt = jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                sub: "guest".into(),
                exp: (Utc::now() - Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        h.control.revoke_token(&jwt).await.unwrap();
        assert!(!h.control.is_token_revoked(&jwt).await.unwrap());
    }
}

mod lock_health {
    use super::*;

    #[tokio::test]
    async fn test_low_battery_emits_event_to_subscribers() {
        let h = harness(fast_settings());
        let owner = Uuid::new_v4();
        let property = Uuid::new_v4();
        h.store
            .create_webhook_endpoint(&NewWebhookEndpoint {
                url: "https://hooks.example.com/locks".into(),
                secret: "whsec".into(),
                events: Some("lock.battery_low".into()),
                owner_id: Some(owner),
            })
            .await
            .unwrap();
        h.lock.set_status(
            property,
            LockStatus {
                online: true,
                battery_level: 9,
            },
        );

        let status = h.control.check_lock_health(property, owner).await.unwrap();
        assert_eq!(status.battery_level, 9);
        assert!(h
            .metrics
            .render()
            .contains("guestkey_webhook_jobs_enqueued_total 1"));
    }
}
