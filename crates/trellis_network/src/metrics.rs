//! Engine counters, readable without taking the engine lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use trellis_foundation::{CacheCounters, CacheStats};

use crate::builder::BuildStats;

/// Phases whose cumulative durations are tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Rule compilation.
    Compile,
    /// Fact propagation and firing.
    Propagate,
    /// Garbage collection.
    Collect,
    /// Undo of a failed call or an explicit rollback.
    Rollback,
}

/// Counters shared between the engine and its observers.
///
/// Everything here lives outside the engine lock. The per-rule table sits
/// behind its own mutex, held only while an entry is copied in or out.
#[derive(Debug, Default)]
pub struct Metrics {
    nodes_created: AtomicUsize,
    nodes_reused: AtomicUsize,
    nodes_live: AtomicUsize,
    nodes_collected: AtomicUsize,
    facts_asserted: AtomicU64,
    facts_retracted: AtomicU64,
    facts_updated: AtomicU64,
    activations_fired: AtomicU64,
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    compile_ns: AtomicU64,
    propagate_ns: AtomicU64,
    collect_ns: AtomicU64,
    rollback_ns: AtomicU64,
    rules: Mutex<BTreeMap<String, BuildStats>>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub(crate) fn record_build(&self, stats: &BuildStats) {
        self.nodes_created.fetch_add(stats.nodes_created, Ordering::Relaxed);
        self.nodes_reused.fetch_add(stats.nodes_reused, Ordering::Relaxed);
    }

    pub(crate) fn rule_built(&self, rule: &str, stats: BuildStats) {
        self.rules.lock().insert(rule.to_string(), stats);
    }

    pub(crate) fn rule_removed(&self, rule: &str) {
        self.rules.lock().remove(rule);
    }

    pub(crate) fn rules_cleared(&self) {
        self.rules.lock().clear();
    }

    pub(crate) fn set_live_nodes(&self, live: usize) {
        self.nodes_live.store(live, Ordering::Relaxed);
    }

    pub(crate) fn record_collected(&self, count: usize) {
        self.nodes_collected.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn fact_asserted(&self) {
        bump(&self.facts_asserted);
    }

    pub(crate) fn fact_retracted(&self) {
        bump(&self.facts_retracted);
    }

    pub(crate) fn fact_updated(&self) {
        bump(&self.facts_updated);
    }

    pub(crate) fn activation_fired(&self) {
        bump(&self.activations_fired);
    }

    pub(crate) fn transaction_begun(&self) {
        bump(&self.transactions_begun);
    }

    pub(crate) fn transaction_committed(&self) {
        bump(&self.transactions_committed);
    }

    pub(crate) fn transaction_rolled_back(&self) {
        bump(&self.transactions_rolled_back);
    }

    pub(crate) fn record_phase(&self, phase: Phase, elapsed: Duration) {
        let counter = match phase {
            Phase::Compile => &self.compile_ns,
            Phase::Propagate => &self.propagate_ns,
            Phase::Collect => &self.collect_ns,
            Phase::Rollback => &self.rollback_ns,
        };
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        counter.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Cumulative time spent in `phase`.
    #[must_use]
    pub fn phase_duration(&self, phase: Phase) -> Duration {
        let counter = match phase {
            Phase::Compile => &self.compile_ns,
            Phase::Propagate => &self.propagate_ns,
            Phase::Collect => &self.collect_ns,
            Phase::Rollback => &self.rollback_ns,
        };
        Duration::from_nanos(counter.load(Ordering::Relaxed))
    }
}

/// Point-in-time view of every engine counter.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetricsSnapshot {
    /// Alpha, beta, and terminal nodes allocated by compilation.
    pub nodes_created: usize,
    /// Nodes shared instead of allocated.
    pub nodes_reused: usize,
    /// Live nodes, root included.
    pub nodes_live: usize,
    /// Nodes freed by collection.
    pub nodes_collected: usize,
    /// `nodes_reused / (nodes_created + nodes_reused)`.
    pub sharing_ratio: f64,
    /// Facts asserted, including rule inserts.
    pub facts_asserted: u64,
    /// Facts retracted.
    pub facts_retracted: u64,
    /// Facts updated.
    pub facts_updated: u64,
    /// Activations whose actions ran.
    pub activations_fired: u64,
    /// Successful `begin` calls.
    pub transactions_begun: u64,
    /// Successful `commit` calls.
    pub transactions_committed: u64,
    /// Explicit rollbacks plus automatically undone calls.
    pub transactions_rolled_back: u64,
    /// Cumulative compile time.
    pub compile_time: Duration,
    /// Cumulative propagation time.
    pub propagate_time: Duration,
    /// Cumulative collection time.
    pub collect_time: Duration,
    /// Cumulative rollback time.
    pub rollback_time: Duration,
    /// Normalizer memo statistics.
    pub normalize_cache: CacheStats,
    /// Sharing registry statistics.
    pub registry_cache: CacheStats,
    /// Build statistics per live rule.
    pub rules: BTreeMap<String, BuildStats>,
}

impl MetricsSnapshot {
    /// Gathers a snapshot from the shared counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn gather(
        metrics: &Metrics,
        normalize: &Arc<CacheCounters>,
        registry: &Arc<CacheCounters>,
    ) -> Self {
        let nodes_created = metrics.nodes_created.load(Ordering::Relaxed);
        let nodes_reused = metrics.nodes_reused.load(Ordering::Relaxed);
        let total = nodes_created + nodes_reused;
        let sharing_ratio = if total == 0 {
            0.0
        } else {
            nodes_reused as f64 / total as f64
        };
        Self {
            nodes_created,
            nodes_reused,
            nodes_live: metrics.nodes_live.load(Ordering::Relaxed),
            nodes_collected: metrics.nodes_collected.load(Ordering::Relaxed),
            sharing_ratio,
            facts_asserted: metrics.facts_asserted.load(Ordering::Relaxed),
            facts_retracted: metrics.facts_retracted.load(Ordering::Relaxed),
            facts_updated: metrics.facts_updated.load(Ordering::Relaxed),
            activations_fired: metrics.activations_fired.load(Ordering::Relaxed),
            transactions_begun: metrics.transactions_begun.load(Ordering::Relaxed),
            transactions_committed: metrics.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: metrics.transactions_rolled_back.load(Ordering::Relaxed),
            compile_time: metrics.phase_duration(Phase::Compile),
            propagate_time: metrics.phase_duration(Phase::Propagate),
            collect_time: metrics.phase_duration(Phase::Collect),
            rollback_time: metrics.phase_duration(Phase::Rollback),
            normalize_cache: normalize.snapshot(),
            registry_cache: registry.snapshot(),
            rules: metrics.rules.lock().clone(),
        }
    }
}
