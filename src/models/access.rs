use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of guest access; decides the access code length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    Temporary,
    Permanent,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Temporary => "TEMPORARY",
            AccessType::Permanent => "PERMANENT",
        }
    }

    /// Number of decimal digits in codes of this type.
    pub fn code_digits(&self) -> u32 {
        match self {
            AccessType::Temporary => 6,
            AccessType::Permanent => 8,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEMPORARY" => Ok(AccessType::Temporary),
            "PERMANENT" => Ok(AccessType::Permanent),
            other => anyhow::bail!("unknown access type: {}", other),
        }
    }
}

/// One guest's permission window on a property.
///
/// Grants are soft-deleted: revocation flips `is_active` and records
/// `revoked_at`/`revoked_by`, and the row is kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub id: Uuid,
    pub property_id: Uuid,
    pub user_id: Uuid,
    pub owner_id: Uuid,
    pub access_type: AccessType,
    /// Plaintext code of rows created before codes were hashed. New grants
    /// never carry it.
    #[serde(skip_serializing)]
    pub code: Option<String>,
    /// `pbkdf2$<digest>$<iterations>$<salt>$<key>`; never rewritten.
    #[serde(skip_serializing)]
    pub hashed_code: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AccessGrant {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Active and not revoked: the only grants validation may match.
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_revoked()
    }

    /// Apply the one permitted mutation.
    pub fn revoke(&mut self, revoked_by: Uuid, at: DateTime<Utc>) {
        self.is_active = false;
        self.revoked_at = Some(at);
        self.revoked_by = Some(revoked_by);
    }
}

/// Input to issuance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGrantRequest {
    pub property_id: Uuid,
    pub user_id: Uuid,
    pub owner_id: Uuid,
    pub access_type: AccessType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// A freshly issued grant. `code` is the only time the plaintext is exposed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedGrant {
    pub grant: AccessGrant,
    pub code: String,
}
