//! Read-side inspection of the graph.

use rusqlite::Connection;

use super::edge::{Edge, EDGE_COLUMNS};
use super::RelationKind;
use crate::error::Result;

pub fn node_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
    Ok(n as u64)
}

pub fn edge_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Outgoing edges of a node, oldest first.
pub fn edges_from(conn: &Connection, node_id: i64) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM edges WHERE source_id = ?1 ORDER BY rowid",
        EDGE_COLUMNS
    ))?;
    let edges = stmt
        .query_map([node_id], Edge::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(edges)
}

/// Edge count per relation kind, most frequent first.
pub fn kind_counts(conn: &Connection) -> Result<Vec<(RelationKind, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT kind, COUNT(*) AS n FROM edges GROUP BY kind ORDER BY n DESC, kind",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (kind, n) = row?;
        out.push((RelationKind::from_stored(&kind), n as u64));
    }
    Ok(out)
}
