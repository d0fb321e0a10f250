pub mod builder;

pub use builder::{BuildError, BuildReport, GraphBuilder};
