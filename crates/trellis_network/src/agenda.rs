//! Pending activations, ordered for firing.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::memory::Token;
use crate::node::NodeId;

// =============================================================================
// Activation
// =============================================================================

/// A rule activation waiting to fire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    /// Which rule
    pub rule: Arc<str>,
    /// Rule salience
    pub salience: i32,
    /// Terminal node holding the token
    pub terminal: NodeId,
    /// Matched facts
    pub token: Token,
    /// Serial the terminal assigned to this token
    pub serial: u64,
    /// Chain depth of the fact change that produced it
    pub depth: u32,
}

#[derive(Debug)]
struct Entry {
    activation: Activation,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher salience first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.activation
            .salience
            .cmp(&other.activation.salience)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// =============================================================================
// Agenda
// =============================================================================

/// Activations ordered by salience (descending), then first-in first-out.
#[derive(Debug, Default)]
pub struct Agenda {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an activation.
    pub fn push(&mut self, activation: Activation) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { activation, seq });
    }

    /// Removes and returns the next activation to fire.
    pub fn pop(&mut self) -> Option<Activation> {
        self.heap.pop().map(|entry| entry.activation)
    }

    /// Number of queued activations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drops every queued activation.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
