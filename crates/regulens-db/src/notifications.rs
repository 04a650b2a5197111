//! Persisted notification fan-out plus best-effort real-time broadcast.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use regulens_core::{Error, NotificationRequest, Notifier, Result};

/// An event pushed to connected clients of one organization.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub organization_id: Uuid,
    pub event: String,
    pub payload: JsonValue,
}

pub struct PgNotifier {
    pool: PgPool,
    realtime: Option<broadcast::Sender<BroadcastEvent>>,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            realtime: None,
        }
    }

    /// Attach a channel to fan events out to live subscribers.
    pub fn with_realtime(mut self, sender: broadcast::Sender<BroadcastEvent>) -> Self {
        self.realtime = Some(sender);
        self
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify_batch(&self, notifications: &[NotificationRequest]) -> Result<()> {
        if notifications.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for n in notifications {
            sqlx::query(
                "INSERT INTO notification
                     (id, user_id, organization_id, kind, title, message,
                      related_entity_id, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::new_v4())
            .bind(n.user_id)
            .bind(n.organization_id)
            .bind(&n.kind)
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.related_entity_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "notifications",
            count = notifications.len(),
            "Persisted notification batch"
        );
        Ok(())
    }

    async fn broadcast(&self, organization_id: Uuid, event: &str, payload: JsonValue) {
        let Some(sender) = &self.realtime else {
            return;
        };
        // A send error only means nobody is listening right now.
        if let Err(e) = sender.send(BroadcastEvent {
            organization_id,
            event: event.to_string(),
            payload,
        }) {
            warn!(
                subsystem = "db",
                component = "notifications",
                event,
                "Broadcast dropped: {e}"
            );
        }
    }
}
