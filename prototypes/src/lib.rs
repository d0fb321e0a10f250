//! Synthetic corpora for benchmarks.
//!
//! Chunk texts repeat a topic word, so chunks (and queries) sharing a topic
//! embed close together under [`BagOfWordsEmbedder`] and the builder links
//! them with similarity edges.

use async_trait::async_trait;
use chunkgraph_core::embedding::{deterministic_embedding, DEFAULT_EMBEDDING_MODEL_ID};
use chunkgraph_core::model::ChunkPayload;
use chunkgraph_core::service::{EmbeddingError, EmbeddingService};
use storage::InMemoryVectorIndex;

/// Sums the deterministic embeddings of a text's whitespace-separated words.
#[derive(Debug, Clone)]
pub struct BagOfWordsEmbedder {
    dims: usize,
}

impl BagOfWordsEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dims];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let vector = deterministic_embedding(&word, DEFAULT_EMBEDDING_MODEL_ID, self.dims);
            for (acc, v) in out.iter_mut().zip(vector) {
                *acc += v;
            }
        }
        out
    }
}

#[async_trait]
impl EmbeddingService for BagOfWordsEmbedder {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorpusShape {
    pub documents: usize,
    pub chunks_per_document: usize,
    pub topics: usize,
}

impl CorpusShape {
    pub fn chunk_count(&self) -> usize {
        self.documents * self.chunks_per_document
    }
}

pub fn topic(index: usize) -> String {
    format!("topic{index}")
}

/// A query that lands near every chunk of `topic(index)`.
pub fn topic_query(index: usize) -> String {
    let word = topic(index);
    format!("{word} {word} {word} question")
}

pub fn chunk_text(shape: &CorpusShape, document: usize, chunk: usize) -> String {
    let word = topic(document % shape.topics.max(1));
    format!("{word} {word} {word} passage d{document}c{chunk}")
}

/// Fill `index` with the corpus. Payloads carry `chunk_index` but no
/// embedding, so builds go through the embedder.
pub async fn load_corpus(index: &InMemoryVectorIndex, embedder: &BagOfWordsEmbedder, shape: &CorpusShape) {
    for document in 0..shape.documents {
        for chunk in 0..shape.chunks_per_document {
            let text = chunk_text(shape, document, chunk);
            let vector = embedder.embed(&text);
            let payload =
                ChunkPayload::new(text, format!("doc-{document}")).with_chunk_index(chunk as u32);
            index
                .upsert(format!("doc-{document}-{chunk}"), vector, payload)
                .await;
        }
    }
}
