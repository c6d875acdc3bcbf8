//! Knowledge graph module: entity identity, relation typing, and graph construction.
//!
//! Tagged tokens resolve to nodes keyed by `(token, pos, type, scope)`;
//! dependency labels classify into [`RelationKind`] edges between them.

pub mod builder;
mod edge;
pub mod identity;
pub mod query;
mod relation;
pub mod tokens;

pub use builder::{BuilderOptions, ConnectionInfo, GraphBuilder};
pub use edge::Edge;
pub use identity::{Node, NodeKey, Resolution, TokenNormalizer};
pub use relation::RelationKind;
pub use tokens::{parse_tagged, TaggedToken};
