pub mod index;
pub mod node;
pub mod store;

pub use index::{ChunkGraph, Edge, EdgeData, EdgeKind, GraphStats, InMemoryVectorIndex};
pub use node::ChunkNode;
pub use store::{GraphStore, GraphUpdate, GraphWriter, StoreError};
