//! Working memories, tokens, and the fact index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use trellis_foundation::FactId;

use crate::node::{NodeId, NodeKind};

// =============================================================================
// Token
// =============================================================================

/// Ordered tuple of facts bound to a rule's variables.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Arc<[FactId]>);

impl Token {
    /// A one-fact token.
    #[must_use]
    pub fn single(fact: FactId) -> Self {
        Self(Arc::from([fact]))
    }

    /// A copy of this token with `fact` appended.
    #[must_use]
    pub fn extended(&self, fact: FactId) -> Self {
        let mut facts = Vec::with_capacity(self.0.len() + 1);
        facts.extend_from_slice(&self.0);
        facts.push(fact);
        Self(facts.into())
    }

    /// Bound facts in variable order.
    #[must_use]
    pub fn facts(&self) -> &[FactId] {
        &self.0
    }

    /// Returns true if `fact` is bound anywhere in the token.
    #[must_use]
    pub fn contains(&self, fact: FactId) -> bool {
        self.0.contains(&fact)
    }

    /// Number of bound facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<FactId>> for Token {
    fn from(facts: Vec<FactId>) -> Self {
        Self(facts.into())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Per-node store of matched facts or tokens.
#[derive(Clone, Debug)]
pub enum Memory {
    /// The root remembers nothing.
    Empty,
    /// Type and alpha nodes: facts that passed every test on the path.
    Facts(BTreeSet<FactId>),
    /// Beta nodes keep the two inputs apart, so a self-join (left and right
    /// fed by the same node) pairs each left token with each right fact once.
    Join {
        /// Tokens received on the left input.
        left: BTreeSet<Token>,
        /// Facts received on the right input.
        right: BTreeSet<FactId>,
    },
    /// Terminal nodes: complete tokens with the serial of their activation.
    Activations(BTreeMap<Token, u64>),
}

impl Memory {
    /// Empty memory of the right shape for `kind`.
    #[must_use]
    pub fn for_kind(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Root => Self::Empty,
            NodeKind::Type { .. } | NodeKind::Alpha { .. } => Self::Facts(BTreeSet::new()),
            NodeKind::Beta(_) => Self::Join {
                left: BTreeSet::new(),
                right: BTreeSet::new(),
            },
            NodeKind::Terminal { .. } => Self::Activations(BTreeMap::new()),
        }
    }

    /// Drops every fact or token that mentions `fact`.
    ///
    /// Returns the number of activations removed (terminal memories only).
    pub fn remove_fact(&mut self, fact: FactId) -> usize {
        match self {
            Self::Empty => 0,
            Self::Facts(facts) => {
                facts.remove(&fact);
                0
            }
            Self::Join { left, right } => {
                right.remove(&fact);
                left.retain(|token| !token.contains(fact));
                0
            }
            Self::Activations(tokens) => {
                let before = tokens.len();
                tokens.retain(|token, _| !token.contains(fact));
                before - tokens.len()
            }
        }
    }

    /// Returns true if any stored fact or token mentions `fact`.
    #[must_use]
    pub fn mentions(&self, fact: FactId) -> bool {
        match self {
            Self::Empty => false,
            Self::Facts(facts) => facts.contains(&fact),
            Self::Join { left, right } => {
                right.contains(&fact) || left.iter().any(|t| t.contains(fact))
            }
            Self::Activations(tokens) => tokens.keys().any(|t| t.contains(fact)),
        }
    }

    /// Facts held by a type or alpha memory.
    #[must_use]
    pub fn facts(&self) -> Option<&BTreeSet<FactId>> {
        match self {
            Self::Facts(facts) => Some(facts),
            _ => None,
        }
    }

    /// Number of stored entries (left and right combined for joins).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Facts(facts) => facts.len(),
            Self::Join { left, right } => left.len() + right.len(),
            Self::Activations(tokens) => tokens.len(),
        }
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything stored.
    pub fn clear(&mut self) {
        match self {
            Self::Empty => {}
            Self::Facts(facts) => facts.clear(),
            Self::Join { left, right } => {
                left.clear();
                right.clear();
            }
            Self::Activations(tokens) => tokens.clear(),
        }
    }
}

// =============================================================================
// Fact Index
// =============================================================================

/// Maps each fact to the nodes whose memory mentions it.
///
/// The index may over-approximate (a node listed for a fact it no longer
/// holds); it never under-approximates.
#[derive(Clone, Debug, Default)]
pub struct FactIndex {
    nodes: HashMap<FactId, BTreeSet<NodeId>>,
}

impl FactIndex {
    /// Records that `node` now mentions `fact`.
    pub fn record(&mut self, fact: FactId, node: NodeId) {
        self.nodes.entry(fact).or_default().insert(node);
    }

    /// Records every fact of a token.
    pub fn record_token(&mut self, token: &Token, node: NodeId) {
        for &fact in token.facts() {
            self.record(fact, node);
        }
    }

    /// Removes and returns the nodes recorded for `fact`.
    pub fn take(&mut self, fact: FactId) -> BTreeSet<NodeId> {
        self.nodes.remove(&fact).unwrap_or_default()
    }

    /// Nodes recorded for `fact`.
    #[must_use]
    pub fn nodes_for(&self, fact: FactId) -> Option<&BTreeSet<NodeId>> {
        self.nodes.get(&fact)
    }

    /// Drops every mention of freed nodes.
    pub fn forget_nodes(&mut self, freed: &HashSet<NodeId>) {
        self.nodes.retain(|_, nodes| {
            nodes.retain(|node| !freed.contains(node));
            !nodes.is_empty()
        });
    }

    /// Number of indexed facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no fact is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
