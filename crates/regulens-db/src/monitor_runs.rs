//! Append-only audit of monitor executions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use regulens_core::{
    Error, MonitorCounts, MonitorRun, MonitorRunRepository, MonitorRunStatus, Result, RunTrigger,
};

pub struct PgMonitorRunRepository {
    pool: PgPool,
}

impl PgMonitorRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitorRunRepository for PgMonitorRunRepository {
    async fn start(&self, trigger: RunTrigger, dry_run: bool, now: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO regulation_monitor_run (id, started_at, trigger_source, dry_run)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(now)
        .bind(trigger.as_str())
        .bind(dry_run)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: MonitorRunStatus,
        counts: MonitorCounts,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // finished_at IS NULL guards against double finalization.
        let result = sqlx::query(
            "UPDATE regulation_monitor_run
             SET finished_at = $2,
                 status = $3,
                 subscriptions_scanned = $4,
                 sources_changed = $5,
                 versions_created = $6,
                 sources_failed = $7,
                 error = $8
             WHERE id = $1 AND finished_at IS NULL",
        )
        .bind(run_id)
        .bind(now)
        .bind(status.as_str())
        .bind(counts.scanned)
        .bind(counts.changed)
        .bind(counts.versions_created)
        .bind(counts.failed)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("open monitor run {run_id}")));
        }
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<MonitorRun>> {
        let rows = sqlx::query(
            "SELECT id, started_at, finished_at, trigger_source, dry_run,
                    subscriptions_scanned, sources_changed, versions_created,
                    sources_failed, status, error
             FROM regulation_monitor_run
             ORDER BY started_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let trigger: String = row.get("trigger_source");
                let status: String = row.get("status");
                MonitorRun {
                    id: row.get("id"),
                    started_at: row.get("started_at"),
                    finished_at: row.get("finished_at"),
                    trigger: RunTrigger::parse(&trigger),
                    dry_run: row.get("dry_run"),
                    subscriptions_scanned: row.get("subscriptions_scanned"),
                    sources_changed: row.get("sources_changed"),
                    versions_created: row.get("versions_created"),
                    sources_failed: row.get("sources_failed"),
                    status: MonitorRunStatus::parse(&status),
                    error: row.get("error"),
                }
            })
            .collect())
    }
}
