//! Subscription repository backing the regulation monitor.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use regulens_core::{defaults, Error, RegulationSubscription, Result, SubscriptionRepository};

pub struct PgSubscriptionRepository {
    pool: PgPool,
    failure_retry_secs: i64,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            failure_retry_secs: defaults::MONITOR_FAILURE_RETRY_SECS,
        }
    }

    pub fn with_failure_retry_secs(mut self, secs: i64) -> Self {
        self.failure_retry_secs = secs;
        self
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> RegulationSubscription {
        RegulationSubscription {
            id: row.get("id"),
            user_id: row.get("user_id"),
            organization_id: row.get("organization_id"),
            regulation_id: row.get("regulation_id"),
            source_url: row.get("source_url"),
            check_interval_secs: row.get("check_interval_secs"),
            is_active: row.get("is_active"),
            last_etag: row.get("last_etag"),
            last_modified: row.get("last_modified"),
            last_content_hash: row.get("last_content_hash"),
            next_check_at: row.get("next_check_at"),
            last_checked_at: row.get("last_checked_at"),
            failure_streak: row.get("failure_streak"),
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, organization_id, regulation_id, source_url, \
     check_interval_secs, is_active, last_etag, last_modified, last_content_hash, \
     next_check_at, last_checked_at, failure_streak";

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        regulation_id: Option<Uuid>,
    ) -> Result<Vec<RegulationSubscription>> {
        let rows = match regulation_id {
            Some(reg) => {
                let sql = format!(
                    "SELECT {SUBSCRIPTION_COLUMNS}
                     FROM regulation_subscription
                     WHERE is_active AND next_check_at <= $1 AND regulation_id = $2
                     ORDER BY next_check_at ASC"
                );
                sqlx::query(&sql)
                    .bind(now)
                    .bind(reg)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {SUBSCRIPTION_COLUMNS}
                     FROM regulation_subscription
                     WHERE is_active AND next_check_at <= $1
                     ORDER BY next_check_at ASC"
                );
                sqlx::query(&sql).bind(now).fetch_all(&self.pool).await
            }
        }
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn mark_checked_ok(
        &self,
        subscription_id: Uuid,
        etag: Option<&str>,
        last_modified: Option<&str>,
        content_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Advance by the row's own interval so per-subscription cadence
        // survives a shared monitor cycle.
        let result = sqlx::query(
            "UPDATE regulation_subscription
             SET last_etag = COALESCE($2, last_etag),
                 last_modified = COALESCE($3, last_modified),
                 last_content_hash = COALESCE($4, last_content_hash),
                 last_checked_at = $5,
                 next_check_at = $5 + make_interval(secs => check_interval_secs),
                 failure_streak = 0
             WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(etag)
        .bind(last_modified)
        .bind(content_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "subscription {subscription_id}"
            )));
        }
        Ok(())
    }

    async fn mark_checked_failed(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let retry_at = now + Duration::seconds(self.failure_retry_secs);
        let result = sqlx::query(
            "UPDATE regulation_subscription
             SET last_checked_at = $2,
                 next_check_at = $3,
                 failure_streak = failure_streak + 1
             WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(now)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "subscription {subscription_id}"
            )));
        }
        Ok(())
    }

    async fn list_active_for_regulation(
        &self,
        regulation_id: Uuid,
    ) -> Result<Vec<RegulationSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS}
             FROM regulation_subscription
             WHERE is_active AND regulation_id = $1
             ORDER BY user_id"
        );
        let rows = sqlx::query(&sql)
            .bind(regulation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }
}
