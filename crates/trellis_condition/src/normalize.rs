//! Canonical normalization of condition trees.
//!
//! Two conditions that differ only in the order of operands of commutative
//! operators normalize to the same tree, and therefore to the same canonical
//! string and hash. The rewrite rules, applied bottom-up:
//!
//! - nested `and`/`or` are flattened into their parent
//! - children of `and`/`or` are sorted by canonical string and deduplicated
//! - a single-child `and`/`or` collapses to the child; an empty one to a literal
//! - `(not (not x))` becomes `x`
//! - operands of `==`, `!=`, `*` are sorted by canonical string
//! - `<`, `<=`, `>`, `>=`, `+`, `-`, `/`, `%`, and call arguments keep their
//!   order (`+` also concatenates strings)
//!
//! Sorting `and`/`or` children discards the author's operand order; children
//! are tested in the sorted order. A guard such as
//! `x.n != 0` is not guaranteed to run before `10 / x.n > 1`; when it does
//! not, the division fails and that propagation path is reported as an
//! evaluation error instead of evaluating to false.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{BoundedCache, CacheConfig, CacheCounters, CacheStats, Value};

use crate::ast::Condition;

// =============================================================================
// Keys
// =============================================================================

/// Canonical string of a normalized condition plus its structural hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConditionKey {
    /// First 8 bytes of the BLAKE3 digest of `canonical`.
    pub hash: u64,
    /// Canonical s-expression.
    pub canonical: Arc<str>,
}

impl ConditionKey {
    /// Builds a key from an already-canonical string.
    #[must_use]
    pub fn from_canonical(canonical: impl Into<Arc<str>>) -> Self {
        let canonical = canonical.into();
        Self {
            hash: digest64(canonical.as_bytes()),
            canonical,
        }
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:016x}]", self.canonical, self.hash)
    }
}

/// 64-bit digest used for both canonical hashes and input fingerprints.
pub(crate) fn digest64(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// A normalized tree together with its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedCondition {
    /// Rewritten tree.
    pub tree: Condition,
    /// Canonical string and hash of `tree`.
    pub key: ConditionKey,
}

impl NormalizedCondition {
    /// Normalizes without caching.
    #[must_use]
    pub fn of(condition: &Condition) -> Self {
        let tree = canonicalize(condition);
        let key = ConditionKey::from_canonical(tree.rendered());
        Self { tree, key }
    }
}

// =============================================================================
// Rewriting
// =============================================================================

/// Rewrites a tree into canonical form.
#[must_use]
pub fn canonicalize(condition: &Condition) -> Condition {
    match condition {
        Condition::Literal(_) | Condition::Field { .. } | Condition::Var(_) => condition.clone(),
        Condition::And(children) => connective(children, true),
        Condition::Or(children) => connective(children, false),
        Condition::Not(inner) => match canonicalize(inner) {
            Condition::Not(twice) => *twice,
            other => Condition::Not(Box::new(other)),
        },
        Condition::Compare { op, left, right } => {
            let (left, right) = operands(left, right, op.is_commutative());
            Condition::Compare {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Condition::Arith { op, left, right } => {
            let (left, right) = operands(left, right, op.is_commutative());
            Condition::Arith {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Condition::Call { name, args } => Condition::Call {
            name: name.clone(),
            args: args.iter().map(canonicalize).collect(),
        },
    }
}

fn connective(children: &[Condition], is_and: bool) -> Condition {
    let mut flat: Vec<(String, Condition)> = Vec::with_capacity(children.len());
    for child in children {
        match canonicalize(child) {
            Condition::And(grand) if is_and => {
                flat.extend(grand.into_iter().map(|g| (g.rendered(), g)));
            }
            Condition::Or(grand) if !is_and => {
                flat.extend(grand.into_iter().map(|g| (g.rendered(), g)));
            }
            other => flat.push((other.rendered(), other)),
        }
    }

    flat.sort_by(|a, b| a.0.cmp(&b.0));
    flat.dedup_by(|a, b| a.0 == b.0);

    let mut parts: Vec<Condition> = flat.into_iter().map(|(_, c)| c).collect();
    match parts.len() {
        0 => Condition::Literal(Value::Bool(is_and)),
        1 => parts.pop().unwrap_or(Condition::Literal(Value::Bool(is_and))),
        _ if is_and => Condition::And(parts),
        _ => Condition::Or(parts),
    }
}

fn operands(left: &Condition, right: &Condition, commutative: bool) -> (Condition, Condition) {
    let left = canonicalize(left);
    let right = canonicalize(right);
    if commutative && right.rendered() < left.rendered() {
        (right, left)
    } else {
        (left, right)
    }
}

// =============================================================================
// Normalizer
// =============================================================================

#[derive(Clone, Debug)]
struct Memo {
    /// Raw rendering of the input, checked on hit to rule out fingerprint collisions.
    raw: Arc<str>,
    normalized: NormalizedCondition,
}

/// Normalizer with a bounded memo keyed by a fingerprint of the input tree.
#[derive(Debug)]
pub struct Normalizer {
    memo: BoundedCache<u64, Memo>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Normalizer {
    /// Creates a normalizer with the given memo configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memo: BoundedCache::new(config),
        }
    }

    /// Normalizes a tree, consulting the memo first.
    pub fn normalize(&mut self, condition: &Condition) -> NormalizedCondition {
        let raw = condition.rendered();
        let fingerprint = digest64(raw.as_bytes());

        if let Some(memo) = self.memo.get(&fingerprint) {
            if *memo.raw == *raw {
                return memo.normalized;
            }
        }

        let normalized = NormalizedCondition::of(condition);
        self.memo.insert(
            fingerprint,
            Memo {
                raw: raw.into(),
                normalized: normalized.clone(),
            },
        );
        normalized
    }

    /// Returns memo statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.memo.stats()
    }

    /// Returns the memo's shared counters for lock-free observation.
    #[must_use]
    pub fn counters(&self) -> Arc<CacheCounters> {
        self.memo.counters()
    }

    /// Drops every memoized entry.
    pub fn clear(&mut self) {
        self.memo.clear();
    }
}
