//! Rule compilation into the node network.
//!
//! A rule compiles to one alpha chain per pattern, a left-deep chain of
//! joins over the patterns in declaration order, and a fresh terminal node.
//! Every alpha and beta node is first looked up in the sharing registry, then
//! among the parent's children, and only created when neither has it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use trellis_condition::{Condition, ConditionKey, Normalizer, validate_calls};
use trellis_foundation::{Error, ErrorKind, Result};
use trellis_storage::{FactStore, TypeRegistry};

use crate::network::{Network, Propagation};
use crate::node::{JoinKey, JoinSpec, NodeId, NodeKind};
use crate::registry::{ShareKey, SharingRegistry};
use crate::rule::{Action, ActionRegistry, Rule};

// =============================================================================
// Build Statistics
// =============================================================================

/// Node creation and reuse counts for one or more compilations.
///
/// Only alpha, beta, and terminal nodes are counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildStats {
    /// Nodes allocated.
    pub nodes_created: usize,
    /// Existing nodes reused.
    pub nodes_reused: usize,
    /// Wall time spent compiling.
    pub build_time: Duration,
}

impl BuildStats {
    /// Fraction of nodes that were reused, or 0.0 for an empty build.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sharing_ratio(&self) -> f64 {
        let total = self.nodes_created + self.nodes_reused;
        if total == 0 {
            0.0
        } else {
            self.nodes_reused as f64 / total as f64
        }
    }

    /// Adds another build's counts to these.
    pub fn absorb(&mut self, other: &BuildStats) {
        self.nodes_created += other.nodes_created;
        self.nodes_reused += other.nodes_reused;
        self.build_time += other.build_time;
    }
}

/// Result of compiling one rule.
#[derive(Clone, Debug)]
pub struct Compiled {
    /// The rule's terminal node.
    pub terminal: NodeId,
    /// Counts for this compilation.
    pub stats: BuildStats,
}

// =============================================================================
// Validation
// =============================================================================

fn invalid(rule: &Rule, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidRule {
        rule: rule.name.to_string(),
        message: message.into(),
    })
}

/// Checks a rule against the registered types and actions.
///
/// # Errors
/// Returns `InvalidRule` for structural problems (no patterns, repeated or
/// unbound variables), `UnknownType`/`UnknownField` for schema problems, and
/// `UnknownFunction`/`ArityMismatch`/`UnknownAction` for unresolved names.
pub fn validate_rule(rule: &Rule, types: &TypeRegistry, actions: &ActionRegistry) -> Result<()> {
    if rule.patterns.is_empty() {
        return Err(invalid(rule, "rule has no patterns"));
    }
    let mut bound: HashMap<&str, &str> = HashMap::new();
    for pattern in &rule.patterns {
        if !types.contains(&pattern.type_name) {
            return Err(Error::unknown_type(&*pattern.type_name));
        }
        if bound.insert(&pattern.var, &pattern.type_name).is_some() {
            return Err(invalid(rule, format!("variable {} bound twice", pattern.var)));
        }
    }

    let check_expr = |condition: &Condition| -> Result<()> {
        for var in condition.variables() {
            if !bound.contains_key(&*var) {
                return Err(invalid(rule, format!("variable {var} is not bound")));
            }
        }
        for (var, field) in condition.field_accesses() {
            types.field(bound[&*var], &field)?;
        }
        validate_calls(condition)
    };

    if let Some(condition) = &rule.condition {
        check_expr(condition)?;
    }

    for action in &rule.actions {
        for expr in action.expressions() {
            check_expr(expr)?;
        }
        match action {
            Action::Insert { type_name, fields } => {
                for (field, _) in fields {
                    types.field(type_name, field)?;
                }
            }
            Action::Retract { var } | Action::Update { var, .. } => {
                let Some(type_name) = bound.get(&**var) else {
                    return Err(invalid(rule, format!("variable {var} is not bound")));
                };
                if let Action::Update { fields, .. } = action {
                    for (field, _) in fields {
                        types.field(type_name, field)?;
                    }
                }
            }
            Action::Custom { name, .. } if !actions.contains(name) => {
                return Err(Error::new(ErrorKind::UnknownAction(name.to_string())));
            }
            Action::Log { .. } | Action::Print { .. } | Action::Custom { .. } => {}
        }
    }
    Ok(())
}

// =============================================================================
// Builder
// =============================================================================

/// Where a conjunct of the rule condition ends up.
#[derive(Debug, Default)]
struct Plan {
    /// Alpha tests per pattern index.
    alpha: Vec<Vec<(Condition, ConditionKey)>>,
    /// Join keys per pattern index (index 0 never has any).
    keys: Vec<Vec<JoinKey>>,
    /// Join tests per pattern index.
    tests: Vec<Vec<(Condition, ConditionKey)>>,
}

/// Compiles rules into a network, reusing nodes wherever possible.
pub struct Builder<'a> {
    network: &'a mut Network,
    registry: &'a mut SharingRegistry,
    normalizer: &'a mut Normalizer,
    stats: BuildStats,
}

impl<'a> Builder<'a> {
    /// Creates a builder over the given network and caches.
    pub fn new(
        network: &'a mut Network,
        registry: &'a mut SharingRegistry,
        normalizer: &'a mut Normalizer,
    ) -> Self {
        Self {
            network,
            registry,
            normalizer,
            stats: BuildStats::default(),
        }
    }

    /// Compiles a validated rule and primes every new node from the facts
    /// already in working memory.
    ///
    /// Activations of the new terminal are reported in `out`.
    ///
    /// # Errors
    /// Returns `UnknownType` if a pattern type has no type node, or an
    /// invariant error if the graph is inconsistent.
    pub fn compile(
        mut self,
        rule: &Rule,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<Compiled> {
        if rule.patterns.is_empty() {
            return Err(invalid(rule, "rule has no patterns"));
        }
        let started = Instant::now();
        let plan = self.plan(rule);
        let mut created = Vec::new();

        // Alpha chains.
        let mut outputs = Vec::with_capacity(rule.patterns.len());
        for (index, pattern) in rule.patterns.iter().enumerate() {
            let mut parent = self
                .network
                .type_node(&pattern.type_name)
                .ok_or_else(|| Error::unknown_type(&*pattern.type_name))?;
            for (test, key) in &plan.alpha[index] {
                parent = self.alpha(&pattern.var, test, key, parent, &mut created)?;
            }
            outputs.push(parent);
        }

        // Join chain.
        let mut left = outputs[0];
        let mut left_vars = vec![rule.patterns[0].var.clone()];
        for (index, pattern) in rule.patterns.iter().enumerate().skip(1) {
            let spec = join_spec(
                &left_vars,
                &pattern.var,
                left,
                outputs[index],
                plan.keys[index].clone(),
                &plan.tests[index],
            );
            left = self.beta(spec, &mut created)?;
            left_vars.push(pattern.var.clone());
        }

        let terminal = self.network.create_node(
            NodeKind::Terminal {
                rule: rule.name.clone(),
                vars: left_vars.into(),
            },
            vec![left],
        )?;
        self.stats.nodes_created += 1;
        created.push(terminal);

        for id in created {
            self.network.prime(id, store, out)?;
        }

        self.stats.build_time = started.elapsed();
        debug!(
            rule = %rule.name,
            created = self.stats.nodes_created,
            reused = self.stats.nodes_reused,
            "rule compiled"
        );
        Ok(Compiled {
            terminal,
            stats: self.stats,
        })
    }

    /// Classifies the top-level conjuncts of the normalized condition.
    fn plan(&mut self, rule: &Rule) -> Plan {
        let width = rule.patterns.len();
        let mut plan = Plan {
            alpha: vec![Vec::new(); width],
            keys: vec![Vec::new(); width],
            tests: vec![Vec::new(); width],
        };
        let Some(condition) = &rule.condition else {
            return plan;
        };
        let position = |var: &str| rule.patterns.iter().position(|p| &*p.var == var);

        for conjunct in self.normalizer.normalize(condition).tree.into_conjuncts() {
            let positions: Vec<usize> = conjunct
                .variables()
                .iter()
                .filter_map(|v| position(v.as_ref()))
                .collect();
            let last = positions.iter().copied().max().unwrap_or(0);

            if positions.len() <= 1 {
                let key = ConditionKey::from_canonical(conjunct.rendered());
                plan.alpha[last].push((conjunct, key));
                continue;
            }

            if let Some(eq) = conjunct.as_join_equality() {
                if positions.len() == 2 {
                    let key = if position(eq.right_var.as_ref()) == Some(last) {
                        JoinKey {
                            left_var: eq.left_var,
                            left_field: eq.left_field,
                            right_field: eq.right_field,
                        }
                    } else {
                        JoinKey {
                            left_var: eq.right_var,
                            left_field: eq.right_field,
                            right_field: eq.left_field,
                        }
                    };
                    plan.keys[last].push(key);
                    continue;
                }
            }

            let key = ConditionKey::from_canonical(conjunct.rendered());
            plan.tests[last].push((conjunct, key));
        }

        for tests in plan.alpha.iter_mut().chain(plan.tests.iter_mut()) {
            tests.sort_by(|a, b| a.1.canonical.cmp(&b.1.canonical));
        }
        for keys in &mut plan.keys {
            keys.sort_by(|a, b| {
                (&a.left_var, &a.left_field, &a.right_field).cmp(&(
                    &b.left_var,
                    &b.left_field,
                    &b.right_field,
                ))
            });
            keys.dedup();
        }
        plan
    }

    fn alpha(
        &mut self,
        var: &Arc<str>,
        test: &Condition,
        key: &ConditionKey,
        parent: NodeId,
        created: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let share = ShareKey::alpha(key, var, parent);
        if let Some(id) = self.registry.lookup(&share, &key.canonical, self.network.arena()) {
            return Ok(self.reused(id, "alpha registry hit"));
        }

        let existing = self.network.find_child(parent, |node| {
            matches!(&node.kind, NodeKind::Alpha { var: v, key: k, .. } if v == var && k == key)
        });
        if let Some(id) = existing {
            self.registry.register(share, key.canonical.clone(), id);
            return Ok(self.reused(id, "alpha found under parent"));
        }

        let id = self.network.create_node(
            NodeKind::Alpha {
                var: var.clone(),
                test: Arc::new(test.clone()),
                key: key.clone(),
            },
            vec![parent],
        )?;
        self.registry.register(share, key.canonical.clone(), id);
        self.stats.nodes_created += 1;
        created.push(id);
        Ok(id)
    }

    fn beta(&mut self, spec: JoinSpec, created: &mut Vec<NodeId>) -> Result<NodeId> {
        let share = ShareKey::beta(&spec.signature, &spec.var, spec.left);
        let canonical = spec.signature.canonical.clone();
        if let Some(id) = self.registry.lookup(&share, &canonical, self.network.arena()) {
            return Ok(self.reused(id, "beta registry hit"));
        }

        let existing = self.network.find_child(spec.left, |node| {
            matches!(&node.kind, NodeKind::Beta(other)
                if other.left == spec.left && other.var == spec.var && other.signature == spec.signature)
        });
        if let Some(id) = existing {
            self.registry.register(share, canonical, id);
            return Ok(self.reused(id, "beta found under parent"));
        }

        let parents = vec![spec.left, spec.right];
        let id = self.network.create_node(NodeKind::Beta(Arc::new(spec)), parents)?;
        self.registry.register(share, canonical, id);
        self.stats.nodes_created += 1;
        created.push(id);
        Ok(id)
    }

    fn reused(&mut self, id: NodeId, how: &'static str) -> NodeId {
        debug!(node = %id, how, "node reused");
        self.stats.nodes_reused += 1;
        id
    }
}

fn join_spec(
    left_vars: &[Arc<str>],
    var: &Arc<str>,
    left: NodeId,
    right: NodeId,
    keys: Vec<JoinKey>,
    tests: &[(Condition, ConditionKey)],
) -> JoinSpec {
    let rendered_vars: Vec<String> = left_vars
        .iter()
        .map(|v| Condition::var(v.clone()).rendered())
        .collect();
    let rendered_keys: Vec<String> = keys
        .iter()
        .map(|k| {
            Condition::field(k.left_var.clone(), k.left_field.clone())
                .equals(Condition::field(var.clone(), k.right_field.clone()))
                .rendered()
        })
        .collect();
    let rendered_tests: Vec<&str> = tests.iter().map(|(_, key)| &*key.canonical).collect();
    let canonical = format!(
        "(join ({}) {} {right} (keys {}) (tests {}))",
        rendered_vars.join(" "),
        Condition::var(var.clone()).rendered(),
        rendered_keys.join(" "),
        rendered_tests.join(" "),
    );

    JoinSpec {
        left_vars: left_vars.to_vec(),
        var: var.clone(),
        left,
        right,
        keys,
        tests: tests.iter().map(|(test, _)| test.clone()).collect(),
        signature: ConditionKey::from_canonical(canonical),
    }
}
