//! Session-scoped advisory locks for deployment-wide single-flight.
//!
//! `pg_try_advisory_lock` is session-scoped, so acquire and release must
//! happen on the same connection. The connection is held for the lock's
//! lifetime and returned to the pool on release.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::Mutex;
use tracing::warn;

use regulens_core::{Error, Result, SingleFlight};

pub struct PgSingleFlight {
    pool: PgPool,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgSingleFlight {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SingleFlight for PgSingleFlight {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            // This instance already holds a lock connection.
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS acquired")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(Error::Database)?;

        let acquired: bool = row.get("acquired");
        if acquired {
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn release(&self, key: i64) -> Result<()> {
        let mut held = self.held.lock().await;
        let Some(mut conn) = held.take() else {
            return Ok(());
        };

        let row = sqlx::query("SELECT pg_advisory_unlock($1) AS released")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(Error::Database)?;

        let released: bool = row.get("released");
        if !released {
            warn!(
                subsystem = "db",
                component = "advisory_lock",
                key,
                "Advisory unlock reported no lock held"
            );
        }
        Ok(())
    }
}
