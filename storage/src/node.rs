use chunkgraph_core::model::{ChunkId, ChunkRecord, DocumentId, UserId};
use chunkgraph_core::service::{embed_with_deadline, EmbeddingError, EmbeddingService};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// One chunk in the graph.
///
/// The text never changes after construction, so the embedding is a pure
/// function of it. The embedding lives in a set-once cell that can be filled
/// through a shared reference: concurrent fillers compute the same vector and
/// whichever `set` lands first is kept.
#[derive(Debug)]
pub struct ChunkNode {
    id: ChunkId,
    document_id: DocumentId,
    user_id: Option<UserId>,
    text: String,
    position: usize,
    embedding: OnceCell<Vec<f32>>,
}

impl ChunkNode {
    pub fn new(
        id: impl Into<ChunkId>,
        document_id: impl Into<DocumentId>,
        text: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            user_id: None,
            text: text.into(),
            position,
            embedding: OnceCell::new(),
        }
    }

    /// Build a node from a scanned record. An embedding shipped in the
    /// payload primes the cache; an empty one is treated as absent.
    pub fn from_record(record: ChunkRecord, position: usize) -> Self {
        let payload = record.payload;
        let node = Self::new(record.id, payload.document_id, payload.text, position)
            .with_user(payload.user_id);
        match payload.embedding {
            Some(embedding) => node.with_embedding(embedding),
            None => node,
        }
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        if !embedding.is_empty() {
            let _ = self.embedding.set(embedding);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn cached_embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }

    /// Store `embedding` unless one is already cached; returns the cached value.
    pub fn cache_embedding(&self, embedding: Vec<f32>) -> &[f32] {
        self.embedding.get_or_init(|| embedding)
    }

    /// Cached embedding, or fetch it from `embedder` and cache it.
    ///
    /// The fetch runs without holding any lock; two callers may both fetch,
    /// which is harmless since the input text is identical.
    pub async fn embedding_or_fetch(
        &self,
        embedder: &dyn EmbeddingService,
        deadline: Duration,
    ) -> Result<&[f32], EmbeddingError> {
        if let Some(embedding) = self.cached_embedding() {
            return Ok(embedding);
        }
        let embedding = embed_with_deadline(embedder, &self.text, deadline).await?;
        Ok(self.cache_embedding(embedding))
    }
}
