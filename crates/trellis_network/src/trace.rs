//! Bounded in-memory record of engine events.
//!
//! The engine only holds a [`TraceBuffer`] when tracing is configured, so a
//! disabled trace costs nothing beyond an `Option` check.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use trellis_foundation::FactId;

use crate::memory::Token;

// =============================================================================
// Trace Event
// =============================================================================

/// Events recorded by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// A fact was stored and propagated.
    FactAsserted {
        /// The fact.
        fact: FactId,
        /// Its type.
        type_name: Arc<str>,
    },
    /// A fact was removed.
    FactRetracted {
        /// The fact.
        fact: FactId,
        /// Activations dropped with it.
        activations_removed: usize,
    },
    /// A fact was replaced under the same id.
    FactUpdated {
        /// The fact.
        fact: FactId,
    },
    /// A token reached a terminal node.
    RuleActivated {
        /// The rule.
        rule: Arc<str>,
        /// Matched facts.
        token: Token,
    },
    /// An activation's actions ran.
    RuleFired {
        /// The rule.
        rule: Arc<str>,
        /// Matched facts.
        token: Token,
        /// Chain depth.
        depth: u32,
    },
    /// A rule was compiled.
    RuleAdded {
        /// The rule.
        rule: Arc<str>,
        /// Nodes allocated.
        nodes_created: usize,
        /// Nodes shared with earlier rules.
        nodes_reused: usize,
    },
    /// A rule was removed.
    RuleRemoved {
        /// The rule.
        rule: Arc<str>,
        /// Nodes freed with it.
        nodes_freed: usize,
    },
    /// `begin` succeeded.
    TransactionBegun {
        /// Transaction id.
        id: u64,
    },
    /// `commit` succeeded.
    TransactionCommitted {
        /// Transaction id.
        id: u64,
        /// Commands discarded.
        commands: usize,
    },
    /// `rollback` succeeded.
    TransactionRolledBack {
        /// Transaction id.
        id: u64,
        /// Commands undone.
        commands: usize,
    },
    /// A collection freed nodes.
    NodesCollected {
        /// Number freed.
        count: usize,
    },
}

impl TraceEvent {
    /// Returns a short name for the event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FactAsserted { .. } => "fact-asserted",
            Self::FactRetracted { .. } => "fact-retracted",
            Self::FactUpdated { .. } => "fact-updated",
            Self::RuleActivated { .. } => "rule-activated",
            Self::RuleFired { .. } => "rule-fired",
            Self::RuleAdded { .. } => "rule-added",
            Self::RuleRemoved { .. } => "rule-removed",
            Self::TransactionBegun { .. } => "transaction-begun",
            Self::TransactionCommitted { .. } => "transaction-committed",
            Self::TransactionRolledBack { .. } => "transaction-rolled-back",
            Self::NodesCollected { .. } => "nodes-collected",
        }
    }

    /// Returns true if this is a rule-related event.
    #[must_use]
    pub fn is_rule_event(&self) -> bool {
        matches!(
            self,
            Self::RuleActivated { .. }
                | Self::RuleFired { .. }
                | Self::RuleAdded { .. }
                | Self::RuleRemoved { .. }
        )
    }
}

/// One recorded event.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Engine operation sequence number the event belongs to.
    pub sequence: u64,
    /// The event.
    pub event: TraceEvent,
}

impl TraceRecord {
    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

// =============================================================================
// Trace Buffer
// =============================================================================

/// Ring buffer of the most recent trace records.
#[derive(Clone, Debug)]
pub struct TraceBuffer {
    records: VecDeque<TraceRecord>,
    max_size: usize,
    next_id: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
        }
    }

    /// Appends an event, evicting the oldest record when full.
    ///
    /// Returns the assigned record id.
    pub fn push(&mut self, sequence: u64, event: TraceEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.max_size == 0 {
            return id;
        }
        if self.records.len() == self.max_size {
            self.records.pop_front();
        }
        self.records.push_back(TraceRecord {
            id,
            sequence,
            event,
        });
        id
    }

    /// Returns the number of records in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clears all records; ids keep increasing.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Returns an iterator over all records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// Returns the most recent `count` records.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&TraceRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }

    /// Returns records of one engine operation.
    #[must_use]
    pub fn for_sequence(&self, sequence: u64) -> Vec<&TraceRecord> {
        self.records.iter().filter(|r| r.sequence == sequence).collect()
    }

    /// Returns records of a specific event type.
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<&TraceRecord> {
        self.records
            .iter()
            .filter(|r| r.event_type() == event_type)
            .collect()
    }

    /// Count of records per event type.
    #[must_use]
    pub fn event_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for record in &self.records {
            *counts.entry(record.event_type()).or_insert(0) += 1;
        }
        counts
    }
}
