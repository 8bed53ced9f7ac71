//! Terminal-failure sink for webhook jobs that exhausted their retries.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::dispatch::DeliveryJob;
use super::webhook::WebhookEvent;

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, job: &DeliveryJob, reason: &str) -> anyhow::Result<()>;
}

/// One dead-lettered job. The endpoint secret is deliberately left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord<'a> {
    pub endpoint_id: Uuid,
    pub url: &'a str,
    pub attempts: u32,
    pub reason: &'a str,
    pub failed_at: String,
    pub event: &'a WebhookEvent,
}

impl<'a> DeadLetterRecord<'a> {
    pub fn new(job: &'a DeliveryJob, reason: &'a str) -> Self {
        Self {
            endpoint_id: job.endpoint_id,
            url: &job.url,
            attempts: job.attempt,
            reason,
            failed_at: chrono::Utc::now().to_rfc3339(),
            event: &job.event,
        }
    }
}

/// Appends dead-lettered jobs as JSON lines so operators can replay them.
pub struct JsonlDeadLetterLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlDeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterLog {
    async fn record(&self, job: &DeliveryJob, reason: &str) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&DeadLetterRecord::new(job, reason))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
