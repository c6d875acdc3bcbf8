//! Node identity: natural keys, normalization, and lookup-or-create.
//!
//! A node is identified by `(token, pos, type, scope)`. The `nodes` table carries
//! a UNIQUE constraint over that tuple, so two writers racing on the same key
//! cannot both insert: the loser gets [`DepgraphError::DuplicateRaceDetected`]
//! from [`insert_node`] and [`create_or_adopt`] turns it into a lookup.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;

use crate::cache::NodeCache;
use crate::error::{is_unique_violation, DepgraphError, Result};

/// Natural key of an entity node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeKey {
    token: String,
    pos: String,
    entity_type: Option<String>,
    scope: Option<String>,
}

impl NodeKey {
    /// Build a key from already-normalized parts. Fields are trimmed; blank
    /// token or POS, and a present-but-blank type or scope, are rejected.
    pub fn new(
        token: &str,
        pos: &str,
        entity_type: Option<&str>,
        scope: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            token: required("token", token)?,
            pos: required("POS tag", pos)?,
            entity_type: entity_type.map(|t| required("entity type", t)).transpose()?,
            scope: scope.map(|s| required("scope", s)).transpose()?,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn pos(&self) -> &str {
        &self.pos
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Composite `token:pos:type` property stored on the node.
    pub fn entity(&self) -> String {
        match &self.entity_type {
            Some(t) => format!("{}:{}:{}", self.token, self.pos, t),
            None => format!("{}:{}", self.token, self.pos),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.entity(), scope),
            None => f.write_str(&self.entity()),
        }
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DepgraphError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

/// Token case policy, applied identically by every ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenNormalizer {
    pub lowercase: bool,
}

impl Default for TokenNormalizer {
    fn default() -> Self {
        Self { lowercase: true }
    }
}

impl TokenNormalizer {
    pub fn normalize(&self, token: &str) -> String {
        let token = token.trim();
        if self.lowercase {
            token.to_lowercase()
        } else {
            token.to_string()
        }
    }

    /// Normalize the token and build the node key. POS and type tags are never case-folded.
    pub fn key(
        &self,
        token: &str,
        pos: &str,
        entity_type: Option<&str>,
        scope: Option<&str>,
    ) -> Result<NodeKey> {
        NodeKey::new(&self.normalize(token), pos, entity_type, scope)
    }
}

/// A stored entity node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: i64,
    pub key: NodeKey,
    pub created_at: String,
}

/// Outcome of resolving a key.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub node: Node,
    /// Whether this call inserted the node
    pub created: bool,
}

/// Exact-match lookup on the natural key.
pub fn find_node(conn: &Connection, key: &NodeKey) -> Result<Option<Node>> {
    let found = conn
        .query_row(
            "SELECT node_id, created_at FROM nodes \
             WHERE token = ?1 AND pos = ?2 AND entity_type = ?3 AND scope = ?4",
            params![
                key.token,
                key.pos,
                key.entity_type.as_deref().unwrap_or(""),
                key.scope.as_deref().unwrap_or(""),
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    Ok(found.map(|(id, created_at)| Node {
        id,
        key: key.clone(),
        created_at,
    }))
}

/// Whether `node` is still stored under its own key and id.
pub fn is_current(conn: &Connection, node: &Node) -> Result<bool> {
    let key = &node.key;
    let found = conn
        .query_row(
            "SELECT 1 FROM nodes \
             WHERE node_id = ?1 AND token = ?2 AND pos = ?3 AND entity_type = ?4 AND scope = ?5",
            params![
                node.id,
                key.token,
                key.pos,
                key.entity_type.as_deref().unwrap_or(""),
                key.scope.as_deref().unwrap_or(""),
            ],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert a node for `key`. Fails with `DuplicateRaceDetected` if the key already exists.
pub fn insert_node(conn: &Connection, key: &NodeKey) -> Result<Node> {
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO nodes (token, pos, entity_type, scope, entity, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key.token,
            key.pos,
            key.entity_type.as_deref().unwrap_or(""),
            key.scope.as_deref().unwrap_or(""),
            key.entity(),
            created_at,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DepgraphError::DuplicateRaceDetected(key.to_string())
        } else {
            DepgraphError::Database(e)
        }
    })?;

    Ok(Node {
        id: conn.last_insert_rowid(),
        key: key.clone(),
        created_at,
    })
}

/// Create the node, or adopt the one a concurrent writer committed first.
pub fn create_or_adopt(conn: &Connection, key: &NodeKey) -> Result<Resolution> {
    match insert_node(conn, key) {
        Ok(node) => {
            log::debug!("Created node {} ({})", node.id, key);
            Ok(Resolution { node, created: true })
        }
        Err(DepgraphError::DuplicateRaceDetected(_)) => {
            log::debug!("Node {} created concurrently, re-reading", key);
            let node = find_node(conn, key)?.ok_or_else(|| {
                DepgraphError::StoreUnavailable(format!(
                    "node {} reported as duplicate but not readable",
                    key
                ))
            })?;
            Ok(Resolution { node, created: false })
        }
        Err(e) => Err(e),
    }
}

/// Return the node for `key`, creating it on first reference.
///
/// Existing nodes are returned unchanged. A cached node is checked against the
/// store first; one that was reset away counts as a miss.
pub fn resolve(conn: &Connection, key: &NodeKey, cache: Option<&NodeCache>) -> Result<Resolution> {
    if let Some(node) = cache.and_then(|c| c.get(key)) {
        if is_current(conn, &node)? {
            return Ok(Resolution { node, created: false });
        }
        log::debug!("Cached node {} ({}) no longer stored", node.id, key);
    }

    if let Some(node) = find_node(conn, key)? {
        return Ok(Resolution { node, created: false });
    }

    create_or_adopt(conn, key)
}
