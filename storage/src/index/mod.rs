pub mod graph;
pub mod vector;

pub use graph::{ChunkGraph, Edge, EdgeData, EdgeKind, GraphStats};
pub use vector::InMemoryVectorIndex;
