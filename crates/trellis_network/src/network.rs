//! The node graph and the fact propagation protocol.
//!
//! Facts enter at their type node and flow down alpha chains; a fact that
//! passes every test on a path is remembered by each node on it. Beta nodes
//! pair left tokens with right facts, and terminal nodes collect complete
//! tokens as activations. Evaluation errors abort only the path that raised
//! them and are returned in [`Propagation::errors`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{trace, warn};
use trellis_condition::{Bindings, Evaluator, Single};
use trellis_foundation::{Error, ErrorContext, Fact, FactId, Result};
use trellis_storage::FactStore;

use crate::memory::{FactIndex, Memory, Token};
use crate::node::{Arena, JoinSpec, Node, NodeId, NodeKind};

/// Variable bindings of a token, in token order.
pub type TokenBindings = Vec<(Arc<str>, Fact)>;

/// A token newly stored at a terminal node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewActivation {
    /// Terminal node.
    pub terminal: NodeId,
    /// Rule of the terminal node.
    pub rule: Arc<str>,
    /// Complete token.
    pub token: Token,
    /// Serial identifying this particular activation of `token`.
    pub serial: u64,
}

/// What one propagation produced.
#[derive(Debug, Default)]
pub struct Propagation {
    /// Activations created, in the order they were reached.
    pub activations: Vec<NewActivation>,
    /// Evaluation errors of aborted paths.
    pub errors: Vec<Error>,
    /// Node activations performed.
    pub steps: usize,
}

/// The node graph with its working memories.
#[derive(Clone, Debug)]
pub struct Network {
    arena: Arena,
    root: NodeId,
    type_nodes: HashMap<Arc<str>, NodeId>,
    index: FactIndex,
    next_serial: u64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Creates a network holding only the root.
    #[must_use]
    pub fn new() -> Self {
        let (arena, root) = Arena::with_root();
        Self {
            arena,
            root,
            type_nodes: HashMap::new(),
            index: FactIndex::default(),
            next_serial: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The node arena.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Returns a live node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// The fact index.
    #[must_use]
    pub fn fact_index(&self) -> &FactIndex {
        &self.index
    }

    /// Type node for `type_name`, if one is attached.
    #[must_use]
    pub fn type_node(&self, type_name: &str) -> Option<NodeId> {
        self.type_nodes.get(type_name).copied()
    }

    /// Returns the type node for `type_name`, creating it under the root.
    ///
    /// # Errors
    /// Returns an invariant error if the arena is exhausted.
    pub fn ensure_type_node(&mut self, type_name: &Arc<str>) -> Result<NodeId> {
        if let Some(id) = self.type_node(type_name) {
            return Ok(id);
        }
        let id = self.create_node(
            NodeKind::Type {
                type_name: type_name.clone(),
            },
            vec![self.root],
        )?;
        self.type_nodes.insert(type_name.clone(), id);
        Ok(id)
    }

    /// Allocates a node and attaches it to each of its parents.
    ///
    /// # Errors
    /// Returns an invariant error if a parent is not live.
    pub fn create_node(&mut self, kind: NodeKind, parents: Vec<NodeId>) -> Result<NodeId> {
        let distinct: BTreeSet<NodeId> = parents.iter().copied().collect();
        if let Some(missing) = distinct.iter().find(|p| !self.arena.contains(**p)) {
            return Err(Error::invariant(format!("parent {missing} is not live")));
        }
        let label = kind.label();
        let id = self.arena.insert(kind, parents)?;
        for parent in distinct {
            if let Some(node) = self.arena.get_mut(parent) {
                node.children.push(id);
            }
        }
        tracing::debug!(node = %id, kind = label, "node created");
        Ok(id)
    }

    /// Finds a child of `parent` satisfying `matches`.
    pub fn find_child<F>(&self, parent: NodeId, mut matches: F) -> Option<NodeId>
    where
        F: FnMut(&Node) -> bool,
    {
        self.arena
            .get(parent)?
            .children
            .iter()
            .filter_map(|c| self.arena.get(*c))
            .find(|c| matches(c))
            .map(|c| c.id)
    }

    /// Every node reachable from the root along child edges.
    #[must_use]
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.arena.get(id) {
                stack.extend(node.children.iter().copied());
            }
        }
        seen
    }

    /// Returns true if `id` is live and reachable from the root.
    #[must_use]
    pub fn is_reachable(&self, id: NodeId) -> bool {
        self.arena.contains(id) && self.reachable().contains(&id)
    }

    /// Detaches every type node from the root. The detached subgraph stays
    /// allocated until collected.
    pub fn detach_all(&mut self) {
        if let Some(root) = self.arena.get_mut(self.root) {
            root.children.clear();
        }
        self.type_nodes.clear();
        self.index.clear();
    }

    /// Frees the given nodes, unlinking them from any live parent.
    pub(crate) fn free_nodes(&mut self, freed: &HashSet<NodeId>) {
        for &id in freed {
            let Some(node) = self.arena.remove(id) else {
                continue;
            };
            for parent in node.parents {
                if let Some(p) = self.arena.get_mut(parent) {
                    p.children.retain(|c| *c != id);
                }
            }
            if let NodeKind::Type { type_name } = &node.kind {
                if self.type_nodes.get(type_name) == Some(&id) {
                    self.type_nodes.remove(type_name);
                }
            }
        }
        self.index.forget_nodes(freed);
    }

    /// Removes a terminal node and every alpha/beta ancestor left without
    /// children. Returns the freed ids.
    pub fn prune(&mut self, terminal: NodeId) -> HashSet<NodeId> {
        let mut freed = HashSet::new();
        let mut stack = vec![terminal];
        while let Some(id) = stack.pop() {
            let Some(node) = self.arena.remove(id) else {
                continue;
            };
            freed.insert(id);
            let parents: BTreeSet<NodeId> = node.parents.into_iter().collect();
            for parent in parents {
                let Some(p) = self.arena.get_mut(parent) else {
                    continue;
                };
                p.children.retain(|c| *c != id);
                let prunable = matches!(p.kind, NodeKind::Alpha { .. } | NodeKind::Beta(_));
                if prunable && p.children.is_empty() {
                    stack.push(parent);
                }
            }
        }
        self.index.forget_nodes(&freed);
        freed
    }

    // -------------------------------------------------------------------------
    // Activations
    // -------------------------------------------------------------------------

    /// Tokens stored at a terminal node with their serials, in token order.
    #[must_use]
    pub fn activations(&self, terminal: NodeId) -> Vec<(Token, u64)> {
        match self.arena.get(terminal).map(|n| &n.memory) {
            Some(Memory::Activations(tokens)) => {
                tokens.iter().map(|(t, s)| (t.clone(), *s)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Returns true if `token` is still stored at `terminal` as the
    /// activation numbered `serial`.
    #[must_use]
    pub fn is_live_activation(&self, terminal: NodeId, token: &Token, serial: u64) -> bool {
        match self.arena.get(terminal).map(|n| &n.memory) {
            Some(Memory::Activations(tokens)) => tokens.get(token) == Some(&serial),
            _ => false,
        }
    }

    /// Resolves a terminal token into variable bindings.
    ///
    /// # Errors
    /// Returns an invariant error if a bound fact is missing from storage.
    pub fn bindings(
        &self,
        terminal: NodeId,
        token: &Token,
        store: &dyn FactStore,
    ) -> Result<TokenBindings> {
        match self.arena.get(terminal).map(|n| &n.kind) {
            Some(NodeKind::Terminal { vars, .. }) => bind(vars, token, store),
            _ => Err(Error::invariant(format!("{terminal} is not a terminal node"))),
        }
    }

    // -------------------------------------------------------------------------
    // Propagation
    // -------------------------------------------------------------------------

    /// Propagates a newly asserted fact from its type node.
    ///
    /// A fact whose type has no type node is inert.
    ///
    /// # Errors
    /// Returns an invariant error if the graph or storage is inconsistent.
    pub fn assert_fact(
        &mut self,
        fact: &Fact,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        let Some(type_node) = self.type_node(&fact.type_name) else {
            trace!(fact = %fact.id, type_name = %fact.type_name, "no type node; fact is inert");
            return Ok(());
        };
        self.activate_fact(type_node, fact, store, out)
    }

    /// Removes a fact from every memory that mentions it.
    ///
    /// Returns the number of activations removed.
    pub fn retract_fact(&mut self, fact: FactId) -> usize {
        let mut removed = 0;
        for id in self.index.take(fact) {
            if let Some(node) = self.arena.get_mut(id) {
                removed += node.memory.remove_fact(fact);
            }
        }
        trace!(fact = %fact, removed, "fact retracted from network");
        removed
    }

    fn activate_fact(
        &mut self,
        node: NodeId,
        fact: &Fact,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        let n = self.live_mut(node)?;
        let Memory::Facts(facts) = &mut n.memory else {
            return Err(Error::invariant(format!("{node} does not hold facts")));
        };
        if !facts.insert(fact.id) {
            return Ok(());
        }
        let children = n.children.clone();
        self.index.record(fact.id, node);
        out.steps += 1;

        for child in children {
            self.feed_fact(node, child, fact, store, out)?;
        }
        Ok(())
    }

    fn feed_fact(
        &mut self,
        from: NodeId,
        child: NodeId,
        fact: &Fact,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        match self.live(child)?.kind.clone() {
            NodeKind::Alpha { var, test, .. } => {
                match Evaluator::test(&test, &Single::new(&var, fact)) {
                    Ok(true) => self.activate_fact(child, fact, store, out)?,
                    Ok(false) => trace!(node = %child, fact = %fact.id, "alpha test failed"),
                    Err(err) => report(out, err, child, fact.id),
                }
            }
            NodeKind::Beta(spec) => {
                if spec.left == from {
                    self.left_activate(child, &spec, Token::single(fact.id), store, out)?;
                }
                if spec.right == from {
                    self.right_activate(child, &spec, fact, store, out)?;
                }
            }
            NodeKind::Terminal { rule, .. } => {
                self.emit(child, &rule, Token::single(fact.id), out)?;
            }
            NodeKind::Root | NodeKind::Type { .. } => {
                return Err(Error::invariant(format!("{child} cannot receive facts")));
            }
        }
        Ok(())
    }

    fn left_activate(
        &mut self,
        node: NodeId,
        spec: &JoinSpec,
        token: Token,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        let Memory::Join { left, right } = &mut self.live_mut(node)?.memory else {
            return Err(Error::invariant(format!("{node} is not a join")));
        };
        if !left.insert(token.clone()) {
            return Ok(());
        }
        let candidates: Vec<FactId> = right.iter().copied().collect();
        self.index.record_token(&token, node);
        out.steps += 1;

        if candidates.is_empty() {
            return Ok(());
        }
        let left_bindings = bind(&spec.left_vars, &token, store)?;
        for id in candidates {
            let right_fact = fetch(store, id)?;
            if joins(spec, &left_bindings, &right_fact, node, out) {
                self.emit_token(node, token.extended(id), store, out)?;
            }
        }
        Ok(())
    }

    fn right_activate(
        &mut self,
        node: NodeId,
        spec: &JoinSpec,
        fact: &Fact,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        let Memory::Join { left, right } = &mut self.live_mut(node)?.memory else {
            return Err(Error::invariant(format!("{node} is not a join")));
        };
        if !right.insert(fact.id) {
            return Ok(());
        }
        let candidates: Vec<Token> = left.iter().cloned().collect();
        self.index.record(fact.id, node);
        out.steps += 1;

        for token in candidates {
            let left_bindings = bind(&spec.left_vars, &token, store)?;
            if joins(spec, &left_bindings, fact, node, out) {
                self.emit_token(node, token.extended(fact.id), store, out)?;
            }
        }
        Ok(())
    }

    /// Passes a token produced by a beta node to its children.
    fn emit_token(
        &mut self,
        beta: NodeId,
        token: Token,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<()> {
        let children = self.live(beta)?.children.clone();
        for child in children {
            match self.live(child)?.kind.clone() {
                NodeKind::Beta(spec) if spec.left == beta => {
                    self.left_activate(child, &spec, token.clone(), store, out)?;
                }
                NodeKind::Terminal { rule, .. } => self.emit(child, &rule, token.clone(), out)?,
                _ => {
                    return Err(Error::invariant(format!(
                        "{child} cannot receive tokens from {beta}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn emit(
        &mut self,
        terminal: NodeId,
        rule: &Arc<str>,
        token: Token,
        out: &mut Propagation,
    ) -> Result<()> {
        let serial = self.next_serial;
        let Memory::Activations(tokens) = &mut self.live_mut(terminal)?.memory else {
            return Err(Error::invariant(format!("{terminal} is not a terminal")));
        };
        if tokens.contains_key(&token) {
            return Ok(());
        }
        tokens.insert(token.clone(), serial);
        self.next_serial += 1;
        self.index.record_token(&token, terminal);
        out.steps += 1;

        trace!(node = %terminal, rule = %rule, token = ?token, "activation");
        out.activations.push(NewActivation {
            terminal,
            rule: rule.clone(),
            token,
            serial,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Priming
    // -------------------------------------------------------------------------

    /// Fills the memory of a node created after facts were already present,
    /// from its parents' memories.
    ///
    /// Nodes must be primed in creation order. Priming never propagates to
    /// children; a primed terminal reports its tokens as new activations.
    ///
    /// # Errors
    /// Returns an invariant error if the graph or storage is inconsistent.
    pub fn prime(&mut self, node: NodeId, store: &dyn FactStore, out: &mut Propagation) -> Result<()> {
        let n = self.live(node)?;
        match n.kind.clone() {
            NodeKind::Alpha { var, test, .. } => {
                let parent = first_parent(n)?;
                let candidates = self.facts_of(parent)?;
                let mut passed = BTreeSet::new();
                for id in candidates {
                    let fact = fetch(store, id)?;
                    match Evaluator::test(&test, &Single::new(&var, &fact)) {
                        Ok(true) => {
                            passed.insert(id);
                        }
                        Ok(false) => {}
                        Err(err) => report(out, err, node, id),
                    }
                }
                for &id in &passed {
                    self.index.record(id, node);
                }
                self.live_mut(node)?.memory = Memory::Facts(passed);
            }
            NodeKind::Beta(spec) => {
                let left: BTreeSet<Token> = self.output_tokens(spec.left, store, out)?.into_iter().collect();
                let right = self.facts_of(spec.right)?;
                for token in &left {
                    self.index.record_token(token, node);
                }
                for &id in &right {
                    self.index.record(id, node);
                }
                self.live_mut(node)?.memory = Memory::Join { left, right };
            }
            NodeKind::Terminal { rule, .. } => {
                let parent = first_parent(n)?;
                for token in self.output_tokens(parent, store, out)? {
                    self.emit(node, &rule, token, out)?;
                }
            }
            NodeKind::Root | NodeKind::Type { .. } => {}
        }
        Ok(())
    }

    /// Tokens a node passes to its children, recomputed from its memory.
    fn output_tokens(
        &self,
        node: NodeId,
        store: &dyn FactStore,
        out: &mut Propagation,
    ) -> Result<Vec<Token>> {
        let n = self.live(node)?;
        match (&n.kind, &n.memory) {
            (NodeKind::Type { .. } | NodeKind::Alpha { .. }, Memory::Facts(facts)) => {
                Ok(facts.iter().copied().map(Token::single).collect())
            }
            (NodeKind::Beta(spec), Memory::Join { left, right }) => {
                let right_facts = right
                    .iter()
                    .map(|id| fetch(store, *id))
                    .collect::<Result<Vec<_>>>()?;
                let mut tokens = Vec::new();
                for token in left {
                    let left_bindings = bind(&spec.left_vars, token, store)?;
                    for fact in &right_facts {
                        if joins(spec, &left_bindings, fact, node, out) {
                            tokens.push(token.extended(fact.id));
                        }
                    }
                }
                Ok(tokens)
            }
            _ => Err(Error::invariant(format!("{node} produces no tokens"))),
        }
    }

    fn facts_of(&self, node: NodeId) -> Result<BTreeSet<FactId>> {
        self.live(node)?
            .memory
            .facts()
            .cloned()
            .ok_or_else(|| Error::invariant(format!("{node} does not hold facts")))
    }

    fn live(&self, id: NodeId) -> Result<&Node> {
        self.arena
            .get(id)
            .ok_or_else(|| Error::invariant(format!("{id} is not live")))
    }

    fn live_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| Error::invariant(format!("{id} is not live")))
    }
}

fn first_parent(node: &Node) -> Result<NodeId> {
    node.parents
        .first()
        .copied()
        .ok_or_else(|| Error::invariant(format!("{} has no parent", node.id)))
}

fn fetch(store: &dyn FactStore, id: FactId) -> Result<Fact> {
    store
        .get_fact(id)
        .ok_or_else(|| Error::invariant(format!("fact {id} is in working memory but not in storage")))
}

fn bind(vars: &[Arc<str>], token: &Token, store: &dyn FactStore) -> Result<TokenBindings> {
    if vars.len() != token.len() {
        return Err(Error::invariant(format!(
            "token {token:?} does not match variables {vars:?}"
        )));
    }
    vars.iter()
        .zip(token.facts())
        .map(|(var, id)| Ok((var.clone(), fetch(store, *id)?)))
        .collect()
}

/// Checks join keys, then join tests, for a left binding set and a right fact.
fn joins(
    spec: &JoinSpec,
    left: &TokenBindings,
    right: &Fact,
    node: NodeId,
    out: &mut Propagation,
) -> bool {
    for key in &spec.keys {
        let left_value = left
            .lookup(&key.left_var)
            .and_then(|fact| fact.get(&key.left_field));
        let right_value = right.get(&key.right_field);
        match (left_value, right_value) {
            (Some(l), Some(r)) if l.loose_eq(r) => {}
            (Some(_), Some(_)) => return false,
            _ => {
                let err = Error::evaluation(format!(
                    "join key {}.{} == {}.{} has a missing field",
                    key.left_var, key.left_field, spec.var, key.right_field
                ));
                report(out, err, node, right.id);
                return false;
            }
        }
    }

    if spec.tests.is_empty() {
        return true;
    }
    let mut all = left.clone();
    all.push((spec.var.clone(), right.clone()));
    for test in &spec.tests {
        match Evaluator::test(test, &all) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                report(out, err, node, right.id);
                return false;
            }
        }
    }
    true
}

fn report(out: &mut Propagation, err: Error, node: NodeId, fact: FactId) {
    warn!(node = %node, fact = %fact, error = %err, "evaluation failed; path aborted");
    let context = ErrorContext::new()
        .with_source(node.to_string())
        .with_fact(fact);
    out.errors.push(err.with_context(context));
}
