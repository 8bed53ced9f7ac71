//! Smart-lock port.
//!
//! Calls are best-effort from the caller's point of view: a failing lock
//! never blocks issuance or revocation of a grant.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::access::AccessGrant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub online: bool,
    /// Percent, 0-100.
    pub battery_level: u8,
}

impl Default for LockStatus {
    fn default() -> Self {
        Self {
            online: true,
            battery_level: 100,
        }
    }
}

#[async_trait]
pub trait LockDriver: Send + Sync {
    /// Push a plaintext code onto the property's lock for the grant's window.
    async fn program_code(&self, grant: &AccessGrant, code: &str) -> anyhow::Result<()>;

    async fn revoke_code(&self, grant: &AccessGrant) -> anyhow::Result<()>;

    async fn get_status(&self, property_id: Uuid) -> anyhow::Result<LockStatus>;
}

/// Driver for deployments without lock hardware: logs every call and
/// reports whatever status was last recorded for a property.
#[derive(Clone, Default)]
pub struct LoggingLockDriver {
    statuses: Arc<DashMap<Uuid, LockStatus>>,
}

impl LoggingLockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, property_id: Uuid, status: LockStatus) {
        self.statuses.insert(property_id, status);
    }
}

#[async_trait]
impl LockDriver for LoggingLockDriver {
    async fn program_code(&self, grant: &AccessGrant, _code: &str) -> anyhow::Result<()> {
        tracing::info!(
            access_id = %grant.id,
            property_id = %grant.property_id,
            start = %grant.start_date,
            end = %grant.end_date,
            "lock: program code"
        );
        Ok(())
    }

    async fn revoke_code(&self, grant: &AccessGrant) -> anyhow::Result<()> {
        tracing::info!(access_id = %grant.id, property_id = %grant.property_id, "lock: revoke code");
        Ok(())
    }

    async fn get_status(&self, property_id: Uuid) -> anyhow::Result<LockStatus> {
        Ok(self
            .statuses
            .get(&property_id)
            .map(|s| *s.value())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_defaults_to_healthy() {
        let driver = LoggingLockDriver::new();
        let status = driver.get_status(Uuid::new_v4()).await.unwrap();
        assert!(status.online);
        assert_eq!(status.battery_level, 100);
    }

    #[tokio::test]
    async fn test_recorded_status_is_reported() {
        let driver = LoggingLockDriver::new();
        let property = Uuid::new_v4();
        driver.set_status(
            property,
            LockStatus {
                online: false,
                battery_level: 7,
            },
        );
        let status = driver.get_status(property).await.unwrap();
        assert!(!status.online);
        assert_eq!(status.battery_level, 7);
    }
}
