use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub use config::ConfigError;

/// Graph construction and traversal knobs.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    /// Similarity edges and expansion admissions require a score strictly above this.
    pub similarity_threshold: f64,
    /// Neighbours admitted per visited node during expansion.
    pub max_neighbors: usize,
    pub max_hops: usize,
    /// Vector-search hits used as traversal seeds.
    pub seed_width: usize,
    /// Weight of edges between consecutive chunks of one document.
    pub adjacency_weight: f64,
    /// Upper bound on chunks fetched per corpus scan.
    pub snapshot_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_neighbors: 5,
            max_hops: 2,
            seed_width: 3,
            adjacency_weight: 0.9,
            snapshot_limit: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub vector_index_ms: u64,
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn vector_index(&self) -> Duration {
        Duration::from_millis(self.vector_index_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: 30_000,
            vector_index_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub max_history: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { max_history: 1024 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub timeouts: TimeoutConfig,
    pub metrics: MetricsConfig,
}

impl EngineConfig {
    /// Layered load: `config/default`, `config/{RUN_MODE}`, then
    /// `CHUNKGRAPH_*` environment overrides (`__` separates sections).
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("CHUNKGRAPH")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let graph = &self.graph;
        if !(0.0..=1.0).contains(&graph.similarity_threshold) {
            return Err(ConfigError::Message(format!(
                "graph.similarity_threshold must be within [0, 1], got {}",
                graph.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&graph.adjacency_weight) {
            return Err(ConfigError::Message(format!(
                "graph.adjacency_weight must be within [0, 1], got {}",
                graph.adjacency_weight
            )));
        }
        if graph.seed_width == 0 {
            return Err(ConfigError::Message(
                "graph.seed_width must be positive".to_string(),
            ));
        }
        if graph.snapshot_limit == 0 {
            return Err(ConfigError::Message(
                "graph.snapshot_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
