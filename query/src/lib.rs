pub mod retriever;

pub use retriever::{ContextQuery, ContextRetriever, Retrieval, RetrievalError};
