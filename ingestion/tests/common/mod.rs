use async_trait::async_trait;
use chunkgraph_core::model::{ChunkPayload, ChunkRecord, SearchHit};
use chunkgraph_core::service::{
    EmbeddingError, EmbeddingService, Filter, VectorIndex, VectorIndexError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use storage::InMemoryVectorIndex;

/// Embeds by table lookup; texts can be scripted to fail.
#[derive(Default)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for TableEmbedder {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(text) {
            return Err(EmbeddingError::Backend(format!("model unavailable for {text:?}")));
        }
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Backend(format!("unknown text {text:?}")))
    }
}

/// In-memory index whose calls can be made to fail or stall.
#[derive(Default)]
pub struct ScriptedIndex {
    pub inner: InMemoryVectorIndex,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), VectorIndexError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(VectorIndexError::Backend("index offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<SearchHit>, VectorIndexError> {
        self.gate().await?;
        self.inner.search(query_vector, limit, filter).await
    }

    async fn scan(&self, filter: &Filter, limit: usize) -> Result<Vec<ChunkRecord>, VectorIndexError> {
        self.gate().await?;
        self.inner.scan(filter, limit).await
    }
}

/// Two documents with three sequential chunks each. Neighbouring chunks of a
/// document are similar to the middle one but not to each other; the two
/// documents live in orthogonal dimensions.
pub fn two_document_corpus() -> Vec<(&'static str, &'static str, &'static str, Vec<f32>)> {
    vec![
        ("d1-c0", "doc-1", "doc one opening", vec![1.0, 0.8, 0.0, 0.0]),
        ("d1-c1", "doc-1", "doc one middle", vec![1.0, 0.0, 0.0, 0.0]),
        ("d1-c2", "doc-1", "doc one closing", vec![1.0, -0.8, 0.0, 0.0]),
        ("d2-c0", "doc-2", "doc two opening", vec![0.0, 0.0, 1.0, 0.8]),
        ("d2-c1", "doc-2", "doc two middle", vec![0.0, 0.0, 1.0, 0.0]),
        ("d2-c2", "doc-2", "doc two closing", vec![0.0, 0.0, 1.0, -0.8]),
    ]
}

/// Load `corpus` into `index` (vectors only, payload without embeddings) and
/// return an embedder that knows every text.
pub async fn load_corpus(
    index: &InMemoryVectorIndex,
    corpus: &[(&str, &str, &str, Vec<f32>)],
) -> TableEmbedder {
    for (id, doc, text, vector) in corpus {
        let payload = ChunkPayload::new(*text, *doc);
        index.upsert(*id, vector.clone(), payload).await;
    }
    let entries: Vec<(&str, Vec<f32>)> = corpus
        .iter()
        .map(|(_, _, text, vector)| (*text, vector.clone()))
        .collect();
    TableEmbedder::new(&entries)
}
