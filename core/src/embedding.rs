use crate::service::{EmbeddingError, EmbeddingService};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "embedding-default-v1";

/// Hash-derived embedding: identical `(text, model_id)` pairs always map to
/// the same vector. Each 32-byte SHA-256 block feeds 32 components, so
/// dimensions beyond 32 do not repeat.
pub fn deterministic_embedding(text: &str, model_id: &str, dims: usize) -> Vec<f32> {
    let dims = dims.max(1);
    let mut out = Vec::with_capacity(dims);
    let mut block = 0u32;

    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(block.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        for byte in digest.iter().take(dims - out.len()) {
            out.push((*byte as f32 / 127.5) - 1.0);
        }
        block += 1;
    }

    out
}

/// Offline [`EmbeddingService`] backed by [`deterministic_embedding`].
#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    dims: usize,
    model_id: String,
}

impl DeterministicEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model_id: DEFAULT_EMBEDDING_MODEL_ID.to_string(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl EmbeddingService for DeterministicEmbedder {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(deterministic_embedding(text, &self.model_id, self.dims))
    }
}
