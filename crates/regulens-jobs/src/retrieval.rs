//! Chunk indexing and retrieval-backed context assembly.
//!
//! Embedding failures degrade rather than abort: a chunk that cannot be
//! embedded is stored with a NULL embedding and a recorded warning so its
//! text survives, and a failed query embedding yields empty context instead
//! of killing the owning job.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use regulens_ai::DocAi;
use regulens_core::{
    defaults, split_text, ChunkRepository, InsightCitation, NewChunk, Result, RetrievalMeta,
    SplitterConfig, Vector,
};

/// Snippet length persisted on citations.
const CITATION_SNIPPET_CHARS: usize = 160;

/// Outcome of reindexing one document's chunks.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub warnings: Vec<String>,
}

/// Context assembled for insight generation.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub context: String,
    pub citations: Vec<InsightCitation>,
    pub meta: RetrievalMeta,
    pub warnings: Vec<String>,
}

/// Splits, embeds, and persists document chunks; assembles retrieval
/// context for downstream prompting.
pub struct ChunkIndexer {
    chunks: Arc<dyn ChunkRepository>,
    ai: Arc<dyn DocAi>,
    splitter: SplitterConfig,
    dimension: usize,
    max_context_chars: usize,
}

impl ChunkIndexer {
    pub fn new(chunks: Arc<dyn ChunkRepository>, ai: Arc<dyn DocAi>) -> Self {
        Self {
            chunks,
            ai,
            splitter: SplitterConfig::default(),
            dimension: defaults::EMBED_DIMENSION,
            max_context_chars: defaults::MAX_CONTEXT_CHARS,
        }
    }

    pub fn with_splitter(mut self, splitter: SplitterConfig) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.max_context_chars = chars;
        self
    }

    fn valid_embedding(&self, vector: &[f32]) -> bool {
        vector.len() == self.dimension && vector.iter().all(|v| v.is_finite())
    }

    /// Replace the document's chunk set from raw text. One batch embedding
    /// call covers all chunks; chunks whose vector is missing or invalid
    /// are persisted with NULL embeddings and reported as warnings.
    pub async fn reindex_document(
        &self,
        org_id: Uuid,
        document_id: Uuid,
        text: &str,
    ) -> Result<IndexReport> {
        let pieces = split_text(text, &self.splitter);
        let mut report = IndexReport {
            chunk_count: pieces.len(),
            ..Default::default()
        };

        if pieces.is_empty() {
            self.chunks.reindex(org_id, document_id, Vec::new()).await?;
            return Ok(report);
        }

        let texts: Vec<String> = pieces.iter().map(|c| c.content.clone()).collect();
        let mut vectors: Vec<Option<Vector>> = vec![None; pieces.len()];

        match self.ai.embed(&texts).await {
            Ok(response) if response.embeddings.len() == pieces.len() => {
                for (i, embedding) in response.embeddings.into_iter().enumerate() {
                    if self.valid_embedding(&embedding) {
                        vectors[i] = Some(Vector::from(embedding));
                    } else {
                        report
                            .warnings
                            .push(format!("chunk {i}: invalid embedding, stored without vector"));
                    }
                }
            }
            Ok(response) => {
                report.warnings.push(format!(
                    "embedding count mismatch ({} for {} chunks), stored without vectors",
                    response.embeddings.len(),
                    pieces.len()
                ));
            }
            Err(e) => {
                report
                    .warnings
                    .push(format!("embedding failed, stored without vectors: {e}"));
            }
        }

        let new_chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedding)| NewChunk {
                chunk_index: piece.index,
                content: piece.content,
                language_tag: piece.language_tag,
                token_estimate: piece.token_estimate,
                embedding,
                metadata: serde_json::json!({
                    "start_offset": piece.start_offset,
                    "end_offset": piece.end_offset,
                }),
            })
            .collect();

        let persisted = self.chunks.reindex(org_id, document_id, new_chunks).await?;
        report.embedded_count = persisted.iter().filter(|c| c.embedding.is_some()).count();

        if !report.warnings.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "retrieval",
                document_id = %document_id,
                chunk_count = report.chunk_count,
                degraded = report.warnings.len(),
                "Reindexed with degraded embeddings"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "retrieval",
                document_id = %document_id,
                chunk_count = report.chunk_count,
                "Reindexed document"
            );
        }
        Ok(report)
    }

    /// Embed the query and assemble top-K chunk context. Hits are re-ordered
    /// by chunk index before concatenation so the assembled context reads in
    /// document order; citations keep similarity order.
    pub async fn retrieve_context(
        &self,
        org_id: Uuid,
        document_id: Option<Uuid>,
        query_text: &str,
        k: usize,
    ) -> Result<RetrievedContext> {
        let degraded = |warning: String| RetrievedContext {
            context: String::new(),
            citations: Vec::new(),
            meta: RetrievalMeta {
                strategy: "retrieval".to_string(),
                top_k: k as i32,
                chunks_considered: 0,
                context_chars: 0,
            },
            warnings: vec![warning],
        };

        let query = match self.ai.embed(&[query_text.to_string()]).await {
            Ok(mut response) if !response.embeddings.is_empty() => {
                let vector = response.embeddings.remove(0);
                if !self.valid_embedding(&vector) {
                    return Ok(degraded("query embedding invalid".to_string()));
                }
                Vector::from(vector)
            }
            Ok(_) => return Ok(degraded("query embedding missing".to_string())),
            Err(e) => return Ok(degraded(format!("query embedding failed: {e}"))),
        };

        let hits = self
            .chunks
            .retrieve_top_k(org_id, &query, k, document_id)
            .await?;

        let citations: Vec<InsightCitation> = hits
            .iter()
            .map(|hit| InsightCitation {
                chunk_id: hit.chunk_id,
                chunk_index: hit.chunk_index,
                similarity: hit.similarity,
                snippet: snippet_of(&hit.content, CITATION_SNIPPET_CHARS),
            })
            .collect();

        let mut ordered = hits;
        ordered.sort_by_key(|hit| hit.chunk_index);

        let mut context = String::new();
        for hit in &ordered {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&hit.content);
        }
        truncate_at_boundary(&mut context, self.max_context_chars);

        Ok(RetrievedContext {
            meta: RetrievalMeta {
                strategy: "retrieval".to_string(),
                top_k: k as i32,
                chunks_considered: ordered.len() as i32,
                context_chars: context.len() as i32,
            },
            context,
            citations,
            warnings: Vec::new(),
        })
    }
}

fn snippet_of(content: &str, max: usize) -> String {
    let mut end = content.len().min(max);
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

/// Truncate in place on a char boundary at or below `max` bytes.
pub(crate) fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
