//! Sharing registry: canonical condition to existing node.
//!
//! Entries are non-owning lookups into the arena. A hit is only trusted after
//! checking the stored canonical string and that the node is still a live
//! child of the expected parent; anything else is dropped as stale.

use std::collections::HashSet;
use std::sync::Arc;

use trellis_condition::ConditionKey;
use trellis_foundation::{BoundedCache, CacheConfig, CacheCounters, CacheStats};

use crate::node::{Arena, NodeId};

/// Lookup key of a sharable node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShareKey {
    /// Alpha test `hash` on `var` under `parent`.
    Alpha {
        /// Hash of the test's canonical string.
        hash: u64,
        /// Variable tested.
        var: Arc<str>,
        /// Parent type or alpha node.
        parent: NodeId,
    },
    /// Join with signature `hash` binding `var` under `left`.
    Beta {
        /// Hash of the join signature.
        hash: u64,
        /// Variable bound on the right input.
        var: Arc<str>,
        /// Left parent.
        left: NodeId,
    },
}

impl ShareKey {
    /// Alpha key for a test under `parent`.
    #[must_use]
    pub fn alpha(key: &ConditionKey, var: &Arc<str>, parent: NodeId) -> Self {
        Self::Alpha {
            hash: key.hash,
            var: var.clone(),
            parent,
        }
    }

    /// Beta key for a join under `left`.
    #[must_use]
    pub fn beta(signature: &ConditionKey, var: &Arc<str>, left: NodeId) -> Self {
        Self::Beta {
            hash: signature.hash,
            var: var.clone(),
            left,
        }
    }

    /// The node the entry must hang under.
    #[must_use]
    pub fn parent(&self) -> NodeId {
        match self {
            Self::Alpha { parent, .. } => *parent,
            Self::Beta { left, .. } => *left,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    node: NodeId,
    canonical: Arc<str>,
}

/// Bounded map from [`ShareKey`] to node.
#[derive(Debug)]
pub struct SharingRegistry {
    cache: BoundedCache<ShareKey, Entry>,
}

impl Default for SharingRegistry {
    fn default() -> Self {
        Self::new(CacheConfig::with_capacity(4096))
    }
}

impl SharingRegistry {
    /// Creates a registry with the given cache configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            cache: BoundedCache::new(config),
        }
    }

    /// Returns the node registered under `key` if it is still valid.
    pub fn lookup(&mut self, key: &ShareKey, canonical: &str, arena: &Arena) -> Option<NodeId> {
        let entry = self.cache.get(key)?;
        let parent = key.parent();
        let attached = arena
            .get(parent)
            .is_some_and(|p| p.children.contains(&entry.node))
            && arena.contains(entry.node);

        if attached && *entry.canonical == *canonical {
            Some(entry.node)
        } else {
            self.cache.remove(key);
            None
        }
    }

    /// Registers `node` under `key`.
    pub fn register(&mut self, key: ShareKey, canonical: Arc<str>, node: NodeId) {
        self.cache.insert(key, Entry { node, canonical });
    }

    /// Drops every entry naming a freed node, either as target or parent.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, freed: &HashSet<NodeId>) -> usize {
        self.cache
            .retain(|key, entry| !freed.contains(&entry.node) && !freed.contains(&key.parent()))
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Shared counters, readable without holding the registry.
    #[must_use]
    pub fn counters(&self) -> Arc<CacheCounters> {
        self.cache.counters()
    }
}
