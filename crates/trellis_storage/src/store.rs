//! Fact storage.
//!
//! The engine only requires that writes are immediately visible to
//! subsequent reads. [`MemoryStore`] keeps facts in a persistent ordered map
//! so a snapshot is an O(1) clone.

use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result};

/// Storage contract consumed by the engine.
///
/// Implementations may be in-memory, replicated, or persistent, provided
/// every write is visible to the next read.
pub trait FactStore: Send + Sync {
    /// Stores a new fact.
    ///
    /// # Errors
    /// Returns `DuplicateFact` if a fact with the same id is already stored.
    fn add_fact(&mut self, fact: Fact) -> Result<()>;

    /// Returns the fact with the given id.
    fn get_fact(&self, id: FactId) -> Option<Fact>;

    /// Returns every stored fact, ordered by id.
    fn get_all_facts(&self) -> Vec<Fact>;

    /// Deletes a fact, returning it.
    ///
    /// # Errors
    /// Returns `FactNotFound` if no fact has this id.
    fn delete_fact(&mut self, id: FactId) -> Result<Fact>;

    /// Returns true if a fact with this id is stored.
    fn contains(&self, id: FactId) -> bool {
        self.get_fact(id).is_some()
    }

    /// Returns the number of stored facts.
    fn len(&self) -> usize;

    /// Returns true if no facts are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every fact.
    fn clear(&mut self);
}

/// In-memory fact store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    facts: im::OrdMap<FactId, Fact>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an O(1) copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Iterates facts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }
}

impl FactStore for MemoryStore {
    fn add_fact(&mut self, fact: Fact) -> Result<()> {
        if self.facts.contains_key(&fact.id) {
            return Err(Error::new(ErrorKind::DuplicateFact(fact.id)));
        }
        self.facts.insert(fact.id, fact);
        Ok(())
    }

    fn get_fact(&self, id: FactId) -> Option<Fact> {
        self.facts.get(&id).cloned()
    }

    fn get_all_facts(&self) -> Vec<Fact> {
        self.facts.values().cloned().collect()
    }

    fn delete_fact(&mut self, id: FactId) -> Result<Fact> {
        self.facts.remove(&id).ok_or_else(|| Error::fact_not_found(id))
    }

    fn contains(&self, id: FactId) -> bool {
        self.facts.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.facts.len()
    }

    fn clear(&mut self) {
        self.facts.clear();
    }
}

#[cfg(feature = "serde")]
mod snapshot {
    use super::MemoryStore;
    use thiserror::Error;
    use trellis_foundation::Fact;

    /// Failure while encoding or decoding a store snapshot.
    #[derive(Debug, Error)]
    pub enum SnapshotError {
        /// MessagePack encoding failed.
        #[error("snapshot encode failed: {0}")]
        Encode(#[from] rmp_serde::encode::Error),
        /// MessagePack decoding failed.
        #[error("snapshot decode failed: {0}")]
        Decode(#[from] rmp_serde::decode::Error),
    }

    impl MemoryStore {
        /// Encodes every fact as a MessagePack snapshot.
        ///
        /// # Errors
        /// Returns an error if a fact cannot be encoded.
        pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
            let facts: Vec<&Fact> = self.facts.values().collect();
            Ok(rmp_serde::to_vec(&facts)?)
        }

        /// Rebuilds a store from a snapshot produced by [`MemoryStore::to_bytes`].
        ///
        /// # Errors
        /// Returns an error if the bytes are not a valid snapshot.
        pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
            let facts: Vec<Fact> = rmp_serde::from_slice(bytes)?;
            Ok(Self {
                facts: facts.into_iter().map(|f| (f.id, f)).collect(),
            })
        }
    }
}

#[cfg(feature = "serde")]
pub use snapshot::SnapshotError;
