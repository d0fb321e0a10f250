use async_trait::async_trait;
use chunkgraph_core::model::{ChunkPayload, ChunkRecord, SearchHit};
use chunkgraph_core::service::{
    EmbeddingError, EmbeddingService, Filter, VectorIndex, VectorIndexError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use storage::InMemoryVectorIndex;

/// Embeds by table lookup. Individual texts, the next `n` calls, or every
/// call can be scripted to fail; calls can be slowed down.
#[derive(Default)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    delay_ms: AtomicU64,
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

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: usize) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for TableEmbedder {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let scripted_failure = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure
            || self.fail_all.load(Ordering::SeqCst)
            || self.failing.lock().unwrap().contains(text)
        {
            return Err(EmbeddingError::Backend(format!("model unavailable for {text:?}")));
        }
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Backend(format!("unknown text {text:?}")))
    }
}

/// In-memory index whose calls can be made to fail.
#[derive(Default)]
pub struct ScriptedIndex {
    pub inner: InMemoryVectorIndex,
    fail: AtomicBool,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn gate(&self) -> Result<(), VectorIndexError> {
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
        self.gate()?;
        self.inner.search(query_vector, limit, filter).await
    }

    async fn scan(&self, filter: &Filter, limit: usize) -> Result<Vec<ChunkRecord>, VectorIndexError> {
        self.gate()?;
        self.inner.scan(filter, limit).await
    }
}

pub type CorpusEntry = (&'static str, &'static str, &'static str, Vec<f32>);

/// Two documents with three sequential chunks each; the documents are
/// orthogonal and a document's outer chunks are similar only to its middle.
pub fn two_document_corpus() -> Vec<CorpusEntry> {
    vec![
        ("d1-c0", "doc-1", "doc one opening", vec![1.0, 0.8, 0.0, 0.0]),
        ("d1-c1", "doc-1", "doc one middle", vec![1.0, 0.0, 0.0, 0.0]),
        ("d1-c2", "doc-1", "doc one closing", vec![1.0, -0.8, 0.0, 0.0]),
        ("d2-c0", "doc-2", "doc two opening", vec![0.0, 0.0, 1.0, 0.8]),
        ("d2-c1", "doc-2", "doc two middle", vec![0.0, 0.0, 1.0, 0.0]),
        ("d2-c2", "doc-2", "doc two closing", vec![0.0, 0.0, 1.0, -0.8]),
    ]
}

pub const DOC_ONE_QUERY: &str = "what does document one say";

pub async fn load_corpus(index: &InMemoryVectorIndex, corpus: &[CorpusEntry]) {
    for (id, doc, text, vector) in corpus {
        index
            .upsert(*id, vector.clone(), ChunkPayload::new(*text, *doc))
            .await;
    }
}

/// An embedder knowing every corpus text plus [`DOC_ONE_QUERY`], which
/// lands on doc one's middle chunk.
pub fn corpus_embedder(corpus: &[CorpusEntry]) -> TableEmbedder {
    let mut entries: Vec<(&str, Vec<f32>)> = corpus
        .iter()
        .map(|(_, _, text, vector)| (*text, vector.clone()))
        .collect();
    entries.push((DOC_ONE_QUERY, vec![1.0, 0.0, 0.0, 0.0]));
    TableEmbedder::new(&entries)
}
