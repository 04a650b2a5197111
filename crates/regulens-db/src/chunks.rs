//! Document chunk repository: pgvector storage and similarity retrieval.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use regulens_core::{
    defaults, ChunkHit, ChunkRepository, DocumentChunk, EmbeddingCoverage, Error, NewChunk, Result,
};

/// PostgreSQL implementation of ChunkRepository.
pub struct PgChunkRepository {
    pool: PgPool,
    dimension: usize,
}

impl PgChunkRepository {
    /// Create a new repository expecting the default embedding dimension.
    pub fn new(pool: PgPool) -> Self {
        Self::with_dimension(pool, defaults::EMBED_DIMENSION)
    }

    /// Create a new repository with an explicit embedding dimension.
    pub fn with_dimension(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Reject a vector that does not match the configured dimensionality
    /// or contains non-finite components. Never truncates or pads.
    pub fn validate_embedding(&self, vector: &Vector) -> Result<()> {
        let slice = vector.as_slice();
        if slice.len() != self.dimension {
            return Err(Error::Embedding(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                slice.len()
            )));
        }
        if let Some(pos) = slice.iter().position(|v| !v.is_finite()) {
            return Err(Error::Embedding(format!(
                "non-finite component at index {pos}"
            )));
        }
        Ok(())
    }

    /// Reject duplicate chunk indices before any write.
    fn validate_indices(chunks: &[NewChunk]) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(chunks.len());
        for chunk in chunks {
            if !seen.insert(chunk.chunk_index) {
                return Err(Error::InvalidInput(format!(
                    "duplicate chunk index {}",
                    chunk.chunk_index
                )));
            }
        }
        Ok(())
    }

    fn parse_chunk_row(row: sqlx::postgres::PgRow) -> DocumentChunk {
        DocumentChunk {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
            language_tag: row.get("language_tag"),
            token_estimate: row.get("token_estimate"),
            embedding: row.get("embedding"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    #[instrument(skip(self, chunks), fields(subsystem = "db", component = "chunks", op = "reindex"))]
    async fn reindex(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<DocumentChunk>> {
        // Validate the whole request before touching the table so a
        // rejection leaves the prior generation intact.
        Self::validate_indices(&chunks)?;
        for chunk in &chunks {
            if let Some(embedding) = &chunk.embedding {
                self.validate_embedding(embedding)?;
            }
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM document_chunk WHERE organization_id = $1 AND document_id = $2")
            .bind(org_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut persisted = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO document_chunk
                     (id, organization_id, document_id, chunk_index, content,
                      language_tag, token_estimate, embedding, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(id)
            .bind(org_id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.language_tag)
            .bind(chunk.token_estimate)
            .bind(&chunk.embedding)
            .bind(&chunk.metadata)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            persisted.push(DocumentChunk {
                id,
                organization_id: org_id,
                document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content,
                language_tag: chunk.language_tag,
                token_estimate: chunk.token_estimate,
                embedding: chunk.embedding,
                metadata: chunk.metadata,
                created_at: now,
            });
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "chunks",
            op = "reindex",
            document_id = %document_id,
            chunk_count = persisted.len(),
            "Reindexed document chunks"
        );
        Ok(persisted)
    }

    async fn retrieve_top_k(
        &self,
        org_id: Uuid,
        query: &Vector,
        k: usize,
        document_id: Option<Uuid>,
    ) -> Result<Vec<ChunkHit>> {
        self.validate_embedding(query)?;

        let doc_clause = if document_id.is_some() {
            "AND document_id = $4"
        } else {
            ""
        };

        let sql = format!(
            "SELECT id, document_id, chunk_index, content,
                    1.0 - (embedding <=> $1) AS similarity
             FROM document_chunk
             WHERE organization_id = $2
               AND embedding IS NOT NULL
               {doc_clause}
             ORDER BY embedding <=> $1
             LIMIT $3"
        );

        let mut q = sqlx::query(&sql).bind(query).bind(org_id).bind(k as i64);
        if let Some(doc) = document_id {
            q = q.bind(doc);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| ChunkHit {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                similarity: row.get("similarity"),
            })
            .collect())
    }

    async fn embedding_coverage(
        &self,
        org_id: Uuid,
        document_id: Uuid,
    ) -> Result<EmbeddingCoverage> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(embedding) AS embedded
             FROM document_chunk
             WHERE organization_id = $1 AND document_id = $2",
        )
        .bind(org_id)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(EmbeddingCoverage {
            total_chunks: row.get("total"),
            embedded_chunks: row.get("embedded"),
        })
    }
}
