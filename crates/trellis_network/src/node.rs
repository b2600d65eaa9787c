//! Network nodes and the arena that owns them.
//!
//! Nodes live in a generational arena: parent-child edges and registry
//! entries store [`NodeId`]s, never references, so a freed slot can be
//! reused without any stale id aliasing the new occupant.

use std::fmt;
use std::sync::Arc;

use trellis_condition::{Condition, ConditionKey};
use trellis_foundation::{Error, Result};

use crate::memory::Memory;

// =============================================================================
// Node Id
// =============================================================================

/// Generational index of a node in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId {
    /// Slot index.
    pub index: u32,
    /// Slot generation at allocation time.
    pub generation: u32,
}

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}:{}", self.index, self.generation)
    }
}

// =============================================================================
// Node Kinds
// =============================================================================

/// A join key `left_var.left_field == right_var.right_field`, oriented so the
/// right side is the variable joined at this node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinKey {
    /// Variable already bound on the left input.
    pub left_var: Arc<str>,
    /// Field of the left variable's fact.
    pub left_field: Arc<str>,
    /// Field of the right input's fact.
    pub right_field: Arc<str>,
}

/// Join specification of a beta node.
#[derive(Clone, Debug)]
pub struct JoinSpec {
    /// Variables bound by left tokens, in token order.
    pub left_vars: Vec<Arc<str>>,
    /// Variable bound by right facts.
    pub var: Arc<str>,
    /// Left input: an alpha/type node (facts) or a beta node (tokens).
    pub left: NodeId,
    /// Right input: an alpha or type node.
    pub right: NodeId,
    /// Correlated-field equalities.
    pub keys: Vec<JoinKey>,
    /// Other cross-variable tests evaluated once both sides are bound.
    pub tests: Vec<Condition>,
    /// Canonical signature; two joins with equal signatures under the same
    /// left parent are interchangeable.
    pub signature: ConditionKey,
}

impl JoinSpec {
    /// Variables bound by this node's output tokens.
    #[must_use]
    pub fn output_vars(&self) -> Vec<Arc<str>> {
        let mut vars = self.left_vars.clone();
        vars.push(self.var.clone());
        vars
    }
}

/// What a node does.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Entry point owning every type node.
    Root,
    /// Gates facts by type name.
    Type {
        /// Fact type accepted.
        type_name: Arc<str>,
    },
    /// Tests one condition against the fact bound to one variable.
    Alpha {
        /// Variable the test is written against.
        var: Arc<str>,
        /// Normalized test.
        test: Arc<Condition>,
        /// Canonical key of `test`.
        key: ConditionKey,
    },
    /// Joins left tokens with right facts.
    Beta(Arc<JoinSpec>),
    /// Collects complete tokens for one rule.
    Terminal {
        /// Rule name.
        rule: Arc<str>,
        /// Variables of stored tokens, in token order.
        vars: Arc<[Arc<str>]>,
    },
}

impl NodeKind {
    /// Short kind label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Type { .. } => "type",
            Self::Alpha { .. } => "alpha",
            Self::Beta(_) => "beta",
            Self::Terminal { .. } => "terminal",
        }
    }

    /// Returns true for nodes whose memory holds facts rather than tokens.
    #[must_use]
    pub fn holds_facts(&self) -> bool {
        matches!(self, Self::Type { .. } | Self::Alpha { .. })
    }
}

/// A node in the network.
#[derive(Clone, Debug)]
pub struct Node {
    /// This node's id.
    pub id: NodeId,
    /// What the node does.
    pub kind: NodeKind,
    /// Inputs: one for alpha/type/terminal nodes, left then right for a beta
    /// node (the same id twice for a self-join).
    pub parents: Vec<NodeId>,
    /// Owned children, in creation order.
    pub children: Vec<NodeId>,
    /// Working memory.
    pub memory: Memory,
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Generational arena of nodes; its live set is the lifecycle registry.
#[derive(Clone, Debug, Default)]
pub struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an arena holding only the root node, at slot 0.
    #[must_use]
    pub fn with_root() -> (Self, NodeId) {
        let id = NodeId::new(0, 0);
        let root = Node {
            id,
            kind: NodeKind::Root,
            parents: Vec::new(),
            children: Vec::new(),
            memory: Memory::Empty,
        };
        let arena = Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(root),
            }],
            free: Vec::new(),
            live: 1,
        };
        (arena, id)
    }

    /// Allocates a node, reusing a freed slot if one is available.
    ///
    /// # Errors
    /// Returns an invariant error once `u32::MAX` slots are in use.
    pub fn insert(&mut self, kind: NodeKind, parents: Vec<NodeId>) -> Result<NodeId> {
        let memory = Memory::for_kind(&kind);
        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            NodeId::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len())
                .map_err(|_| Error::invariant("node arena exhausted"))?;
            self.slots.push(Slot {
                generation: 0,
                node: None,
            });
            NodeId::new(index, 0)
        };
        self.slots[id.index as usize].node = Some(Node {
            id,
            kind,
            parents,
            children: Vec::new(),
            memory,
        });
        self.live += 1;
        Ok(id)
    }

    /// Returns a live node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    /// Returns a live node mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Returns true if `id` names a live node.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Frees a node's slot, returning the node.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    /// Iterates live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|slot| slot.node.as_ref())
    }

    /// Iterates live node ids in slot order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter().map(|node| node.id)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no node is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
