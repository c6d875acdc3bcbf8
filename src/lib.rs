pub mod config;
pub mod error;
pub mod db;
pub mod cache;
pub mod graph;

pub use config::Config;
pub use error::{DepgraphError, Result};
pub use graph::{GraphBuilder, NodeKey, RelationKind, TaggedToken};
