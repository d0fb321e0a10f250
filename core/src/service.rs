//! Contracts for the collaborators the engine consumes: the embedding service
//! and the external vector index. Both are async traits so that network
//! clients and in-memory doubles can be swapped behind `Arc<dyn _>`.

use crate::error::{ChunkGraphError, ErrorCode};
use crate::model::{ChunkRecord, DocumentId, SearchHit, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding service error: {0}")]
    Backend(String),
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
}

impl ChunkGraphError for EmbeddingError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EmbeddingError::Backend(_) => ErrorCode::Unavailable,
            EmbeddingError::Timeout(_) => ErrorCode::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VectorIndexError {
    #[error("vector index error: {0}")]
    Backend(String),
    #[error("vector index request timed out after {0:?}")]
    Timeout(Duration),
}

impl ChunkGraphError for VectorIndexError {
    fn error_code(&self) -> ErrorCode {
        match self {
            VectorIndexError::Backend(_) => ErrorCode::Unavailable,
            VectorIndexError::Timeout(_) => ErrorCode::DeadlineExceeded,
        }
    }
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest neighbours of `query_vector`, best first.
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>, VectorIndexError>;

    /// Unranked listing of stored chunks, used to snapshot the corpus.
    async fn scan(&self, filter: &Filter, limit: usize) -> Result<Vec<ChunkRecord>, VectorIndexError>;
}

/// Equality / set-membership conditions on payload fields, AND-combined.
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub user_id: Option<UserId>,
    pub document_ids: Option<Vec<DocumentId>>,
}

impl Filter {
    pub fn new(user_id: Option<UserId>, document_ids: Option<Vec<DocumentId>>) -> Self {
        // An empty user id or id list means "no restriction", matching how
        // callers pass optional values through.
        let user_id = user_id.filter(|user| !user.is_empty());
        let document_ids = document_ids.filter(|ids| !ids.is_empty());
        Self {
            user_id,
            document_ids,
        }
    }

    pub fn document(document_id: impl Into<DocumentId>) -> Self {
        Self {
            user_id: None,
            document_ids: Some(vec![document_id.into()]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.document_ids.is_none()
    }

    pub fn matches(&self, document_id: &str, user_id: Option<&str>) -> bool {
        if let Some(expected) = &self.user_id {
            if user_id != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| id == document_id) {
                return false;
            }
        }
        true
    }
}

pub async fn embed_with_deadline(
    service: &dyn EmbeddingService,
    text: &str,
    deadline: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    match timeout(deadline, service.get_embedding(text)).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Timeout(deadline)),
    }
}

pub async fn search_with_deadline(
    index: &dyn VectorIndex,
    query_vector: &[f32],
    limit: usize,
    filter: &Filter,
    deadline: Duration,
) -> Result<Vec<SearchHit>, VectorIndexError> {
    match timeout(deadline, index.search(query_vector, limit, filter)).await {
        Ok(result) => result,
        Err(_) => Err(VectorIndexError::Timeout(deadline)),
    }
}

pub async fn scan_with_deadline(
    index: &dyn VectorIndex,
    filter: &Filter,
    limit: usize,
    deadline: Duration,
) -> Result<Vec<ChunkRecord>, VectorIndexError> {
    match timeout(deadline, index.scan(filter, limit)).await {
        Ok(result) => result,
        Err(_) => Err(VectorIndexError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingService for SlowEmbedder {
        async fn get_embedding(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0])
        }
    }

    #[test]
    fn test_filter_and_combines_conditions() {
        let filter = Filter::new(
            Some("alice".to_string()),
            Some(vec!["doc-1".to_string(), "doc-2".to_string()]),
        );

        assert!(filter.matches("doc-1", Some("alice")));
        assert!(filter.matches("doc-2", Some("alice")));
        assert!(!filter.matches("doc-3", Some("alice")));
        assert!(!filter.matches("doc-1", Some("bob")));
        assert!(!filter.matches("doc-1", None));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new(None, Some(Vec::new()));
        assert!(filter.is_empty());
        assert!(filter.matches("any", None));
        assert!(filter.matches("any", Some("someone")));
    }

    #[test]
    fn test_empty_user_id_is_no_restriction() {
        let filter = Filter::new(Some(String::new()), None);
        assert!(filter.user_id.is_none());
        assert!(filter.is_empty());
        assert!(filter.matches("doc-1", None));
        assert!(filter.matches("doc-1", Some("alice")));

        let scoped = Filter::new(Some(String::new()), Some(vec!["doc-1".to_string()]));
        assert!(scoped.matches("doc-1", None));
        assert!(!scoped.matches("doc-2", None));
    }

    #[tokio::test]
    async fn test_embed_with_deadline_times_out() {
        let deadline = Duration::from_millis(20);
        let result = embed_with_deadline(&SlowEmbedder, "hello", deadline).await;
        assert_eq!(result, Err(EmbeddingError::Timeout(deadline)));
        assert_eq!(
            result.unwrap_err().error_code(),
            ErrorCode::DeadlineExceeded
        );
    }
}
