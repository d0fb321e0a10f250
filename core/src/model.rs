use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ChunkId = String;
pub type DocumentId = String;
pub type UserId = String;

/// Payload stored next to each vector in the external index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub document_id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Ordinal of the chunk inside its document, when the chunker recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChunkPayload {
    pub fn new(text: impl Into<String>, document_id: impl Into<DocumentId>) -> Self {
        Self {
            text: text.into(),
            document_id: document_id.into(),
            user_id: None,
            chunk_index: None,
            embedding: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_chunk_index(mut self, index: u32) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A chunk as returned by a corpus scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub payload: ChunkPayload,
}

/// A ranked vector-search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// One passage handed to the generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: ChunkId,
    pub text: String,
    pub score: f64,
    pub document_id: DocumentId,
}

impl From<SearchHit> for ContextItem {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            text: hit.payload.text,
            score: hit.score as f64,
            document_id: hit.payload.document_id,
        }
    }
}
