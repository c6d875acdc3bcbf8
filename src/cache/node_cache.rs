use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::graph::{Node, NodeKey};

/// Thread-safe LRU cache of resolved nodes
///
/// Maps natural keys to nodes that are known to be committed, so repeat
/// references to an entity skip the natural-key lookup. Entries can outlive
/// their rows (another handle may reset the location), so callers confirm a
/// hit with [`crate::graph::identity::is_current`].
pub struct NodeCache {
    cache: Mutex<LruCache<NodeKey, Node>>,
}

impl NodeCache {
    /// Create a new node cache holding at most `capacity` nodes (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<NodeKey, Node>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cached node for a key
    pub fn get(&self, key: &NodeKey) -> Option<Node> {
        self.lock().get(key).cloned()
    }

    /// Store a committed node
    pub fn put(&self, node: Node) {
        self.lock().put(node.key.clone(), node);
    }

    /// Get the current number of cached entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.lock().clear();
    }
}
