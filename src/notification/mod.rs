pub mod dead_letter;
pub mod dispatch;
pub mod slack;
pub mod webhook;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::access::AccessGrant;

/// Human-facing notifications (guest messaging, operator alerts).
///
/// Callers treat delivery as best-effort: a failed notification is logged and
/// never fails the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn access_revoked(&self, grant: &AccessGrant) -> anyhow::Result<()>;

    async fn low_battery(&self, property_id: Uuid, battery_level: u8) -> anyhow::Result<()>;
}
