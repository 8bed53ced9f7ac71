use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{GrantRepository, NewWebhookEndpoint, WebhookEndpointRepository};
use crate::access::codec::AccessCodeCodec;
use crate::models::access::AccessGrant;
use crate::models::webhook::WebhookEndpoint;

const GRANT_COLUMNS: &str = "id, property_id, user_id, owner_id, access_type, code, hashed_code, \
     start_date, end_date, is_active, revoked_at, revoked_by, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl GrantRepository for PgStore {
    async fn find_active_grants_by_property(
        &self,
        property_id: Uuid,
    ) -> anyhow::Result<Vec<AccessGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants \
             WHERE property_id = $1 AND is_active = true AND revoked_at IS NULL \
             ORDER BY created_at ASC"
        ))
        .bind(property_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccessGrant::try_from).collect()
    }

    async fn find_grant_by_id(&self, id: Uuid) -> anyhow::Result<Option<AccessGrant>> {
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccessGrant::try_from).transpose()
    }

    async fn create_grant(&self, grant: &AccessGrant) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO access_grants
               (id, property_id, user_id, owner_id, access_type, code, hashed_code,
                start_date, end_date, is_active, revoked_at, revoked_by, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(grant.id)
        .bind(grant.property_id)
        .bind(grant.user_id)
        .bind(grant.owner_id)
        .bind(grant.access_type.as_str())
        .bind(&grant.code)
        .bind(&grant.hashed_code)
        .bind(grant.start_date)
        .bind(grant.end_date)
        .bind(grant.is_active)
        .bind(grant.revoked_at)
        .bind(grant.revoked_by)
        .bind(grant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_grant_revocation(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
        revoked_by: Uuid,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE access_grants SET is_active = false, revoked_at = $2, revoked_by = $3 \
             WHERE id = $1 AND is_active = true AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(revoked_at)
        .bind(revoked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists_grant_with_code(
        &self,
        property_id: Uuid,
        code: &str,
    ) -> anyhow::Result<bool> {
        // Hashes are salted, so candidates are checked one by one. Expired
        // grants still take part: validation sees them until they are revoked.
        let candidates = self.find_active_grants_by_property(property_id).await?;

        let code = code.to_string();
        let exists = tokio::task::spawn_blocking(move || {
            candidates
                .iter()
                .any(|g| AccessCodeCodec::matches_grant(&code, g))
        })
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl WebhookEndpointRepository for PgStore {
    async fn list_active_webhook_endpoints(
        &self,
        owner_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<WebhookEndpoint>> {
        let rows = sqlx::query_as::<_, WebhookEndpoint>(
            "SELECT id, url, secret, events, owner_id, is_active, created_at FROM webhook_endpoints \
             WHERE is_active = true AND (owner_id IS NULL OR owner_id = $1) \
             ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_webhook_endpoint(
        &self,
        endpoint: &NewWebhookEndpoint,
    ) -> anyhow::Result<WebhookEndpoint> {
        endpoint.validate()?;
        let row = sqlx::query_as::<_, WebhookEndpoint>(
            r#"INSERT INTO webhook_endpoints (url, secret, events, owner_id)
               VALUES ($1, $2, $3, $4)
               RETURNING id, url, secret, events, owner_id, is_active, created_at"#,
        )
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(&endpoint.events)
        .bind(endpoint.owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_webhook_endpoint(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    id: Uuid,
    property_id: Uuid,
    user_id: Uuid,
    owner_id: Uuid,
    access_type: String,
    code: Option<String>,
    hashed_code: Option<String>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: bool,
    revoked_at: Option<DateTime<Utc>>,
    revoked_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<GrantRow> for AccessGrant {
    type Error = anyhow::Error;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        Ok(AccessGrant {
            id: row.id,
            property_id: row.property_id,
            user_id: row.user_id,
            owner_id: row.owner_id,
            access_type: row.access_type.parse()?,
            code: row.code,
            hashed_code: row.hashed_code,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            revoked_at: row.revoked_at,
            revoked_by: row.revoked_by,
            created_at: row.created_at,
        })
    }
}
