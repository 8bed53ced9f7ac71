//! Webhook delivery against a local mock receiver.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use guestkey::metrics::Metrics;
use guestkey::notification::dead_letter::DeadLetterSink;
use guestkey::notification::dispatch::{DeliveryConfig, DeliveryJob, WebhookDispatcher};
use guestkey::notification::webhook::{sign_payload, RetryPolicy, WebhookEvent};
use guestkey::store::{MemoryStore, NewWebhookEndpoint, WebhookEndpointRepository};

const SECRET: &str = "whsec_test";

#[derive(Default)]
struct CollectingSink {
    jobs: Mutex<Vec<(DeliveryJob, String)>>,
}

#[async_trait]
impl DeadLetterSink for CollectingSink {
    async fn record(&self, job: &DeliveryJob, reason: &str) -> anyhow::Result<()> {
        self.jobs.lock().unwrap().push((job.clone(), reason.to_string()));
        Ok(())
    }
}

fn config(policy: RetryPolicy, max_attempts: u32) -> DeliveryConfig {
    DeliveryConfig {
        workers: 2,
        max_attempts,
        base_backoff: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
        retry_policy: policy,
    }
}

async fn store_with_endpoint(url: String) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .create_webhook_endpoint(&NewWebhookEndpoint {
            url,
            secret: SECRET.into(),
            events: None,
            owner_id: None,
        })
        .await
        .unwrap();
    store
}

/// Poll until `done` holds, failing the test after five seconds.
async fn eventually(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_delivery_is_signed_and_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists("x-webhook-signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_endpoint(format!("{}/hook", server.uri())).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(store),
        config(RetryPolicy::TransportOnly, 5),
        metrics.clone(),
        None,
    )
    .unwrap();
    pool.spawn();

    let event = WebhookEvent::new("access.created", serde_json::json!({"accessId": Uuid::nil()}));
    assert_eq!(dispatcher.dispatch_event(&event, None).await.unwrap(), 1);
    eventually(|| metrics.webhook_outcomes("delivered") == 1).await;

    let requests = server.received_requests().await.unwrap();
    let req = &requests[0];
    let header = |name: &str| req.headers.get(name).unwrap().to_str().unwrap().to_string();

    let body = String::from_utf8(req.body.clone()).unwrap();
    let timestamp: i64 = header("x-webhook-timestamp").parse().unwrap();
    assert_eq!(header("x-webhook-signature"), sign_payload(SECRET, timestamp, &body));
    assert_eq!(header("x-webhook-id"), event.id.to_string());
    assert_eq!(header("idempotency-key"), event.id.to_string());
    assert!(header("content-type").starts_with("application/json"));

    let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(sent["type"], "access.created");
    assert_eq!(sent["id"], event.id.to_string());
}

#[tokio::test]
async fn test_any_response_counts_as_delivered_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_endpoint(server.uri()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(store),
        config(RetryPolicy::TransportOnly, 5),
        metrics.clone(),
        None,
    )
    .unwrap();
    pool.spawn();

    dispatcher
        .dispatch_event(&WebhookEvent::new("access.revoked", serde_json::json!({})), None)
        .await
        .unwrap();
    eventually(|| metrics.webhook_outcomes("delivered") == 1).await;
    assert_eq!(metrics.webhook_attempts(), 1);
}

#[tokio::test]
async fn test_status_aware_retries_server_errors_with_same_event_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = store_with_endpoint(server.uri()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(store),
        config(RetryPolicy::StatusAware, 5),
        metrics.clone(),
        None,
    )
    .unwrap();
    pool.spawn();

    dispatcher
        .dispatch_event(&WebhookEvent::new("access.created", serde_json::json!({})), None)
        .await
        .unwrap();
    eventually(|| metrics.webhook_outcomes("delivered") == 1).await;
    assert_eq!(metrics.webhook_attempts(), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].headers.get("x-webhook-id"),
        requests[1].headers.get("x-webhook-id")
    );
}

#[tokio::test]
async fn test_status_aware_client_error_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_endpoint(server.uri()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let sink = Arc::new(CollectingSink::default());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(store),
        config(RetryPolicy::StatusAware, 5),
        metrics.clone(),
        Some(sink.clone() as Arc<dyn DeadLetterSink>),
    )
    .unwrap();
    pool.spawn();

    dispatcher
        .dispatch_event(&WebhookEvent::new("access.created", serde_json::json!({})), None)
        .await
        .unwrap();
    eventually(|| metrics.webhook_outcomes("failed") == 1).await;
    eventually(|| sink.jobs.lock().unwrap().len() == 1).await;

    let jobs = sink.jobs.lock().unwrap();
    assert_eq!(jobs[0].0.attempt, 1);
    assert!(jobs[0].1.contains("400"));
}

#[tokio::test]
async fn test_transport_failures_exhaust_retries() {
    // nothing listens on port 1
    let store = store_with_endpoint("http://127.0.0.1:1/hook".into()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let sink = Arc::new(CollectingSink::default());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(store),
        config(RetryPolicy::TransportOnly, 3),
        metrics.clone(),
        Some(sink.clone() as Arc<dyn DeadLetterSink>),
    )
    .unwrap();
    pool.spawn();

    dispatcher
        .dispatch_event(&WebhookEvent::new("access.revoked", serde_json::json!({})), None)
        .await
        .unwrap();
    eventually(|| metrics.webhook_outcomes("failed") == 1).await;
    eventually(|| sink.jobs.lock().unwrap().len() == 1).await;

    assert_eq!(metrics.webhook_attempts(), 3);
    assert_eq!(metrics.webhook_outcomes("delivered"), 0);
    let jobs = sink.jobs.lock().unwrap();
    assert_eq!(jobs[0].0.attempt, 3);
    assert!(jobs[0].1.starts_with("transport error"));
}

#[tokio::test]
async fn test_workers_exit_when_dispatcher_dropped() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let (dispatcher, pool) = WebhookDispatcher::new(
        Arc::new(MemoryStore::new()),
        config(RetryPolicy::TransportOnly, 1),
        metrics,
        None,
    )
    .unwrap();
    let handles = pool.spawn();
    drop(dispatcher);

    tokio::time::timeout(Duration::from_secs(2), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await
    .expect("workers should stop once the queue closes");
}
