//! Webhook fan-out and the delivery worker pool.
//!
//! Job lifecycle: QUEUED → IN_FLIGHT → DELIVERED, or RETRY_SCHEDULED (back
//! to QUEUED after an exponential delay), or FAILED_TERMINAL once
//! `max_attempts` is reached. Workers share one queue, so several jobs for
//! the same endpoint may be in flight at once and arrive in any order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dead_letter::DeadLetterSink;
use super::webhook::{DeliveryOutcome, RetryPolicy, WebhookEvent, WebhookSender};
use crate::errors::AppResult;
use crate::metrics::Metrics;
use crate::store::WebhookEndpointRepository;

/// One event bound for one endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub endpoint_id: Uuid,
    pub url: String,
    pub secret: String,
    pub event: WebhookEvent,
    /// Attempts made so far.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::TransportOnly,
        }
    }
}

/// Delay before the retry that follows attempt number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Producer side: resolves subscribed endpoints and enqueues jobs.
#[derive(Clone)]
pub struct WebhookDispatcher {
    tx: mpsc::UnboundedSender<DeliveryJob>,
    endpoints: Arc<dyn WebhookEndpointRepository>,
    metrics: Arc<Metrics>,
}

/// Consumer side: call `spawn()` once at startup.
pub struct DeliveryWorkerPool {
    shared: Arc<WorkerShared>,
    workers: usize,
}

struct WorkerShared {
    rx: Mutex<mpsc::UnboundedReceiver<DeliveryJob>>,
    /// Weak so that pending retries never keep the queue open on shutdown.
    retry_tx: mpsc::WeakUnboundedSender<DeliveryJob>,
    sender: WebhookSender,
    config: DeliveryConfig,
    metrics: Arc<Metrics>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl WebhookDispatcher {
    pub fn new(
        endpoints: Arc<dyn WebhookEndpointRepository>,
        config: DeliveryConfig,
        metrics: Arc<Metrics>,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
    ) -> anyhow::Result<(Self, DeliveryWorkerPool)> {
        let sender = WebhookSender::new(config.request_timeout, config.retry_policy)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = config.workers.max(1);

        let pool = DeliveryWorkerPool {
            shared: Arc::new(WorkerShared {
                rx: Mutex::new(rx),
                retry_tx: tx.downgrade(),
                sender,
                config,
                metrics: metrics.clone(),
                dead_letters,
            }),
            workers,
        };
        let dispatcher = Self {
            tx,
            endpoints,
            metrics,
        };
        Ok((dispatcher, pool))
    }

    /// Fan `event` out to every active endpoint of `owner_id` (plus global
    /// endpoints) whose allow-list admits it. Returns the number of jobs queued.
    pub async fn dispatch_event(
        &self,
        event: &WebhookEvent,
        owner_id: Option<Uuid>,
    ) -> AppResult<usize> {
        let endpoints = self.endpoints.list_active_webhook_endpoints(owner_id).await?;

        let mut queued = 0;
        for endpoint in endpoints
            .into_iter()
            .filter(|e| e.is_active && e.subscribes_to(&event.event_type))
        {
            let job = DeliveryJob {
                endpoint_id: endpoint.id,
                url: endpoint.url,
                secret: endpoint.secret,
                event: event.clone(),
                attempt: 0,
            };
            if self.enqueue(job) {
                queued += 1;
            }
        }

        if queued == 0 {
            debug!(event_id = %event.id, event_type = %event.event_type, "no webhook endpoints subscribed");
        } else {
            info!(event_id = %event.id, event_type = %event.event_type, jobs = queued, "webhook event queued");
        }
        self.metrics.record_webhook_enqueued(queued as u64);
        Ok(queued)
    }

    /// Queue a job directly. False if the worker pool has shut down.
    pub fn enqueue(&self, job: DeliveryJob) -> bool {
        match self.tx.send(job) {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                warn!(event_id = %job.event.id, url = %job.url, "webhook queue closed, job dropped");
                self.metrics.record_webhook_outcome("dropped");
                false
            }
        }
    }
}

impl DeliveryWorkerPool {
    /// Start the fixed set of consumer tasks. They exit once every
    /// dispatcher handle is dropped and the queue is drained.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "starting webhook delivery workers");
        (0..self.workers)
            .map(|worker| {
                let shared = self.shared.clone();
                tokio::spawn(async move { run_worker(shared, worker).await })
            })
            .collect()
    }
}

async fn run_worker(shared: Arc<WorkerShared>, worker: usize) {
    loop {
        let next = { shared.rx.lock().await.recv().await };
        let Some(job) = next else {
            debug!(worker, "webhook queue closed, worker exiting");
            return;
        };
        process_job(&shared, worker, job).await;
    }
}

async fn process_job(shared: &Arc<WorkerShared>, worker: usize, mut job: DeliveryJob) {
    job.attempt += 1;
    shared.metrics.record_webhook_attempt();

    let outcome = shared
        .sender
        .deliver(&job.url, &job.secret, &job.event)
        .await;

    match outcome {
        DeliveryOutcome::Delivered { status } => {
            info!(
                worker,
                url = %job.url,
                event_id = %job.event.id,
                event_type = %job.event.event_type,
                attempt = job.attempt,
                status,
                "webhook delivered"
            );
            shared.metrics.record_webhook_outcome("delivered");
        }
        DeliveryOutcome::Retryable(reason) if job.attempt < shared.config.max_attempts => {
            let delay = backoff_delay(shared.config.base_backoff, job.attempt);
            warn!(
                worker,
                url = %job.url,
                event_id = %job.event.id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "webhook delivery failed, will retry"
            );
            shared.metrics.record_webhook_retry();
            schedule_retry(shared, job, delay);
        }
        DeliveryOutcome::Retryable(reason) | DeliveryOutcome::Terminal(reason) => {
            warn!(
                worker,
                url = %job.url,
                event_id = %job.event.id,
                event_type = %job.event.event_type,
                attempt = job.attempt,
                reason = %reason,
                "webhook delivery failed permanently"
            );
            shared.metrics.record_webhook_outcome("failed");
            if let Some(sink) = &shared.dead_letters {
                if let Err(e) = sink.record(&job, &reason).await {
                    tracing::error!(event_id = %job.event.id, error = %e, "failed to write dead letter");
                }
            }
        }
    }
}

fn schedule_retry(shared: &Arc<WorkerShared>, job: DeliveryJob, delay: Duration) {
    let retry_tx = shared.retry_tx.clone();
    let metrics = shared.metrics.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let requeued = retry_tx.upgrade().map(|tx| tx.send(job));
        match requeued {
            Some(Ok(())) => {}
            Some(Err(mpsc::error::SendError(job))) => {
                warn!(event_id = %job.event.id, "webhook queue closed before retry, job dropped");
                metrics.record_webhook_outcome("dropped");
            }
            None => {
                warn!("webhook queue closed before retry, job dropped");
                metrics.record_webhook_outcome("dropped");
            }
        }
    });
}
