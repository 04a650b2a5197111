//! Regulation identity and its append-only version ledger.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use regulens_core::{
    Error, Regulation, RegulationRepository, RegulationStatus, RegulationVersion, Result,
    VersionReason,
};

pub struct PgRegulationRepository {
    pool: PgPool,
}

impl PgRegulationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_version_row(row: sqlx::postgres::PgRow) -> RegulationVersion {
        let reason: String = row.get("reason");
        RegulationVersion {
            id: row.get("id"),
            regulation_id: row.get("regulation_id"),
            organization_id: row.get("organization_id"),
            version_number: row.get("version_number"),
            content: row.get("content"),
            content_hash: row.get("content_hash"),
            raw_source: row.get("raw_source"),
            reason: VersionReason::parse(&reason),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl RegulationRepository for PgRegulationRepository {
    async fn get(&self, org_id: Uuid, regulation_id: Uuid) -> Result<Option<Regulation>> {
        let row = sqlx::query(
            "SELECT id, organization_id, title, jurisdiction, status, created_at, updated_at
             FROM regulation
             WHERE organization_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(regulation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let status: String = row.get("status");
            Regulation {
                id: row.get("id"),
                organization_id: row.get("organization_id"),
                title: row.get("title"),
                jurisdiction: row.get("jurisdiction"),
                status: RegulationStatus::parse(&status),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    async fn latest_version(&self, regulation_id: Uuid) -> Result<Option<RegulationVersion>> {
        let row = sqlx::query(
            "SELECT id, regulation_id, organization_id, version_number, content,
                    content_hash, raw_source, reason, created_at
             FROM regulation_version
             WHERE regulation_id = $1
             ORDER BY version_number DESC
             LIMIT 1",
        )
        .bind(regulation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_version_row))
    }

    async fn create_next_version(
        &self,
        regulation_id: Uuid,
        content: &str,
        content_hash: &str,
        raw_source: Option<&str>,
        reason: VersionReason,
    ) -> Result<RegulationVersion> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The unique (regulation_id, version_number) constraint backstops
        // the max+1 read if two writers ever race past the advisory lock.
        let row = sqlx::query(
            "SELECT r.organization_id,
                    COALESCE(MAX(v.version_number), 0) AS current_max
             FROM regulation r
             LEFT JOIN regulation_version v ON v.regulation_id = r.id
             WHERE r.id = $1
             GROUP BY r.organization_id",
        )
        .bind(regulation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::RegulationNotFound(regulation_id))?;

        let organization_id: Uuid = row.get("organization_id");
        let version_number: i32 = row.get::<i32, _>("current_max") + 1;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO regulation_version
                 (id, regulation_id, organization_id, version_number, content,
                  content_hash, raw_source, reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(regulation_id)
        .bind(organization_id)
        .bind(version_number)
        .bind(content)
        .bind(content_hash)
        .bind(raw_source)
        .bind(reason.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if version_number > 1 {
            sqlx::query(
                "UPDATE regulation SET status = 'amended', updated_at = $2 WHERE id = $1",
            )
            .bind(regulation_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "regulations",
            regulation_id = %regulation_id,
            version_number,
            reason = reason.as_str(),
            "Created regulation version"
        );

        Ok(RegulationVersion {
            id,
            regulation_id,
            organization_id,
            version_number,
            content: content.to_string(),
            content_hash: content_hash.to_string(),
            raw_source: raw_source.map(str::to_string),
            reason,
            created_at: now,
        })
    }
}
