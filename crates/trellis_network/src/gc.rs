//! Reachability-based reclamation of detached nodes.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::network::Network;
use crate::node::NodeId;
use crate::registry::SharingRegistry;

/// Outcome of one collection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collection {
    /// Number of nodes freed.
    pub count: usize,
    /// Freed ids, in ascending order.
    pub freed: Vec<NodeId>,
    /// Time spent.
    pub duration: Duration,
}

/// Frees every live node not reachable from the root, dropping the registry
/// entries that name any of them in the same step.
pub fn collect(network: &mut Network, registry: &mut SharingRegistry) -> Collection {
    let started = Instant::now();
    let reachable = network.reachable();
    let unreachable: HashSet<NodeId> = network
        .arena()
        .ids()
        .filter(|id| !reachable.contains(id))
        .collect();

    let invalidated = registry.invalidate(&unreachable);
    network.free_nodes(&unreachable);

    let mut freed: Vec<NodeId> = unreachable.into_iter().collect();
    freed.sort_unstable();
    debug!(
        freed = freed.len(),
        invalidated,
        live = network.node_count(),
        "collection finished"
    );
    Collection {
        count: freed.len(),
        freed,
        duration: started.elapsed(),
    }
}
