//! Directed relation edges between entity nodes.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{Node, RelationKind};
use crate::error::Result;

/// A stored relation edge (source --kind--> target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub source: i64,
    pub target: i64,
    pub kind: RelationKind,
    /// Parser label as received, kept so `UNKNOWN` edges stay auditable.
    pub label: String,
    pub scope: Option<String>,
    pub created_at: String,
}

impl Edge {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let scope: String = row.get(5)?;
        Ok(Edge {
            id: row.get(0)?,
            source: row.get(1)?,
            target: row.get(2)?,
            kind: RelationKind::from_stored(&row.get::<_, String>(3)?),
            label: row.get(4)?,
            scope: (!scope.is_empty()).then_some(scope),
            created_at: row.get(6)?,
        })
    }
}

pub(crate) const EDGE_COLUMNS: &str =
    "edge_id, source_id, target_id, kind, label, scope, created_at";

/// Insert an edge. Both endpoints must already exist; parallel edges are allowed.
pub fn insert_edge(
    conn: &Connection,
    source: &Node,
    target: &Node,
    kind: RelationKind,
    label: &str,
    scope: Option<&str>,
) -> Result<Edge> {
    let edge = Edge {
        id: Uuid::new_v4().to_string(),
        source: source.id,
        target: target.id,
        kind,
        label: label.to_string(),
        scope: scope.map(str::to_string),
        created_at: Utc::now().to_rfc3339(),
    };

    conn.execute(
        "INSERT INTO edges (edge_id, source_id, target_id, kind, label, scope, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            edge.id,
            edge.source,
            edge.target,
            edge.kind.as_str(),
            edge.label,
            scope.unwrap_or(""),
            edge.created_at,
        ],
    )?;

    log::debug!(
        "Created edge {} {} -[{}]-> {}",
        edge.id,
        source.key,
        edge.kind,
        target.key
    );
    Ok(edge)
}
