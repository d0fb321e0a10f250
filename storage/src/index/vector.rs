use async_trait::async_trait;
use chunkgraph_core::model::{ChunkId, ChunkPayload, ChunkRecord, SearchHit};
use chunkgraph_core::service::{Filter, VectorIndex, VectorIndexError};
use chunkgraph_core::similarity::cosine_similarity;
use std::cmp::Ordering;
use tokio::sync::RwLock;

struct IndexedChunk {
    id: ChunkId,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// Exact linear-scan vector index kept in memory (placeholder for a real
/// ANN service). Scans return chunks in insertion order.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk. Replacement keeps the original scan position.
    pub async fn upsert(&self, id: impl Into<ChunkId>, vector: Vec<f32>, payload: ChunkPayload) {
        let id = id.into();
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.vector = vector;
                entry.payload = payload;
            }
            None => entries.push(IndexedChunk {
                id,
                vector,
                payload,
            }),
        }
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() < len_before
    }

    pub async fn delete_document(&self, document_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|entry| entry.payload.document_id != document_id);
        len_before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn passes(filter: &Filter, payload: &ChunkPayload) -> bool {
    filter.matches(&payload.document_id, payload.user_id.as_deref())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>, VectorIndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(&IndexedChunk, f32)> = entries
            .iter()
            .filter(|entry| passes(filter, &entry.payload))
            .map(|entry| (entry, cosine_similarity(query_vector, &entry.vector) as f32))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(entry, score)| SearchHit {
                id: entry.id.clone(),
                score,
                payload: entry.payload.clone(),
            })
            .collect())
    }

    async fn scan(&self, filter: &Filter, limit: usize) -> Result<Vec<ChunkRecord>, VectorIndexError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| passes(filter, &entry.payload))
            .take(limit)
            .map(|entry| ChunkRecord {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
            })
            .collect())
    }
}
