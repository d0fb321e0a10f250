use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which stage produced a retrieval's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    Graph,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Default)]
struct RetrievalMetrics {
    total: u64,
    degraded: u64,
    failed: u64,
    latencies: VecDeque<u64>, // microseconds
}

#[derive(Debug, Clone, Default)]
struct BuildMetrics {
    total: u64,
    failed: u64,
}

struct MetricsState {
    retrieval: RetrievalMetrics,
    build: BuildMetrics,
    max_history: usize,
}

#[derive(Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                retrieval: RetrievalMetrics::default(),
                build: BuildMetrics::default(),
                max_history: max_history.max(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_retrieval(&self, path: RetrievalPath, latency_us: u64) {
        let mut state = self.lock();
        let max_history = state.max_history;
        let retrieval = &mut state.retrieval;
        retrieval.total += 1;
        match path {
            RetrievalPath::Graph => {}
            RetrievalPath::Degraded => retrieval.degraded += 1,
            RetrievalPath::Failed => retrieval.failed += 1,
        }
        retrieval.latencies.push_back(latency_us);
        if retrieval.latencies.len() > max_history {
            retrieval.latencies.pop_front();
        }
    }

    pub fn record_build(&self, succeeded: bool) {
        let mut state = self.lock();
        state.build.total += 1;
        if !succeeded {
            state.build.failed += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let r = &state.retrieval;
        let b = &state.build;

        let mut sorted_latencies: Vec<u64> = r.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let degraded_rate = if r.total > 0 {
            (r.degraded + r.failed) as f32 / r.total as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_retrievals: r.total,
            degraded_retrievals: r.degraded,
            failed_retrievals: r.failed,
            degraded_rate,
            p50: percentile(&sorted_latencies, 50.0),
            p95: percentile(&sorted_latencies, 95.0),
            p99: percentile(&sorted_latencies, 99.0),
            history_count: r.latencies.len(),
            total_builds: b.total,
            failed_builds: b.failed,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_retrievals: u64,
    pub degraded_retrievals: u64,
    pub failed_retrievals: u64,
    /// Share of retrievals that did not complete on the graph path.
    pub degraded_rate: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub total_builds: u64,
    pub failed_builds: u64,
}
