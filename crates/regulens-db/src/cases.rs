//! Case context lookup for insight generation.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use regulens_core::{CaseContext, CaseRepository, Error, Result};

pub struct PgCaseRepository {
    pool: PgPool,
}

impl PgCaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CaseRepository for PgCaseRepository {
    async fn get_context(&self, org_id: Uuid, case_id: Uuid) -> Result<Option<CaseContext>> {
        let row = sqlx::query(
            "SELECT id, organization_id, title, description
             FROM case_file
             WHERE organization_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| CaseContext {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            title: row.get("title"),
            description: row.get("description"),
        }))
    }
}
