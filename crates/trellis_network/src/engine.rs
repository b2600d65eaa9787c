//! The engine facade: network, storage, and transactions behind one lock.
//!
//! Every mutating call runs as a unit. The commands it applies are collected
//! in a call log; on success the log is appended to the explicit transaction
//! (if one is active), on failure it is undone newest-first and the error is
//! returned. Activations are queued on an agenda and fired before the call
//! returns.
//!
//! Custom action handlers run while the engine lock is held and must not call
//! back into the engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};
use trellis_condition::{Evaluator, Normalizer};
use trellis_foundation::{
    CacheCounters, Error, ErrorCategory, ErrorContext, ErrorKind, Fact, FactId, FieldMap, Result,
    SemanticLimit, TypeDefinition, Value,
};
use trellis_storage::{FactStore, MemoryStore, TypeRegistry};

use crate::agenda::{Activation, Agenda};
use crate::builder::{BuildStats, Builder, validate_rule};
use crate::config::EngineConfig;
use crate::gc::{self, Collection};
use crate::memory::Token;
use crate::metrics::{Metrics, MetricsSnapshot, Phase};
use crate::network::{Network, Propagation, TokenBindings};
use crate::node::NodeId;
use crate::registry::SharingRegistry;
use crate::rule::{
    Action, ActionContext, ActionEffect, ActionHandler, ActionRegistry, FieldExprs, Rule,
    render_message,
};
use crate::trace::{TraceBuffer, TraceEvent, TraceRecord};
use crate::transaction::{Command, Transaction};

// =============================================================================
// Outcome
// =============================================================================

/// What a mutating call produced besides its state change.
#[derive(Clone, Debug, Default)]
pub struct Outcome {
    /// Activations whose actions ran.
    pub fired: usize,
    /// Evaluation errors of aborted paths and skipped actions.
    pub errors: Vec<Error>,
    /// Lines written by `Print` actions.
    pub output: Vec<String>,
    /// Values emitted by custom handlers.
    pub emitted: Vec<(Arc<str>, Value)>,
}

#[derive(Default)]
struct Call {
    log: Vec<Command>,
    outcome: Outcome,
}

/// How [`EngineState::install_rule`] treats a compiled rule.
enum Install<'a> {
    /// A new rule: account for the build and queue primed activations.
    Compile(&'a mut Call),
    /// Undo of a removal: keep the stats recorded when the rule was added.
    Restore(BuildStats),
}

// =============================================================================
// State
// =============================================================================

#[derive(Clone, Debug)]
struct RuleEntry {
    rule: Arc<Rule>,
    terminal: NodeId,
    stats: BuildStats,
}

struct EngineState {
    config: EngineConfig,
    types: TypeRegistry,
    store: Box<dyn FactStore>,
    network: Network,
    registry: SharingRegistry,
    normalizer: Normalizer,
    rules: BTreeMap<Arc<str>, RuleEntry>,
    actions: ActionRegistry,
    transaction: Option<Transaction>,
    next_transaction: u64,
    agenda: Agenda,
    clock: u64,
    next_fact_id: u64,
    sequence: u64,
    trace: Option<TraceBuffer>,
    poisoned: Option<Error>,
    cumulative: BuildStats,
    metrics: Arc<Metrics>,
}

/// A RETE production-rule engine.
///
/// `Engine` is `Send + Sync`; every operation except [`Engine::metrics`]
/// takes the engine lock, writers exclusively.
pub struct Engine {
    state: RwLock<EngineState>,
    metrics: Arc<Metrics>,
    normalize_counters: Arc<CacheCounters>,
    registry_counters: Arc<CacheCounters>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with the default configuration and an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with an in-memory store.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, Box::new(MemoryStore::new()))
    }

    /// Creates an engine over the given store.
    ///
    /// Facts already in the store are kept but stay inert until their type
    /// is registered.
    #[must_use]
    pub fn with_store(config: EngineConfig, store: Box<dyn FactStore>) -> Self {
        let metrics = Arc::new(Metrics::default());
        let normalizer = Normalizer::new(config.normalize_cache);
        let registry = SharingRegistry::new(config.registry_cache);
        let normalize_counters = normalizer.counters();
        let registry_counters = registry.counters();
        let next_fact_id = store
            .get_all_facts()
            .iter()
            .map(|f| f.id.raw().saturating_add(1))
            .max()
            .unwrap_or(1);
        let network = Network::new();
        metrics.set_live_nodes(network.node_count());

        let state = EngineState {
            trace: config.trace_capacity.map(TraceBuffer::new),
            config,
            types: TypeRegistry::new(),
            store,
            network,
            registry,
            normalizer,
            rules: BTreeMap::new(),
            actions: ActionRegistry::new(),
            transaction: None,
            next_transaction: 1,
            agenda: Agenda::new(),
            clock: 0,
            next_fact_id,
            sequence: 0,
            poisoned: None,
            cumulative: BuildStats::default(),
            metrics: metrics.clone(),
        };
        Self {
            state: RwLock::new(state),
            metrics,
            normalize_counters,
            registry_counters,
        }
    }

    // -------------------------------------------------------------------------
    // Schema and rules
    // -------------------------------------------------------------------------

    /// Registers a fact type and attaches its type node.
    ///
    /// Stored facts of the type that validate against it are propagated.
    /// Type registration is not recorded in transactions.
    ///
    /// # Errors
    /// Returns `DuplicateType` for a conflicting definition.
    pub fn register_type(&self, definition: TypeDefinition) -> Result<()> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        let name = definition.name.clone();
        if !state.types.register(definition.clone())? {
            return Ok(());
        }
        let result = state.attach_type(&name, &definition);
        state.poison_on_invariant(result)
    }

    /// Registers the handler for `Custom` actions named `name`.
    pub fn register_action(&self, name: impl Into<Arc<str>>, handler: impl ActionHandler + 'static) {
        self.state.write().actions.register(name, handler);
    }

    /// Compiles a rule into the network.
    ///
    /// Facts already present are matched immediately and the resulting
    /// activations fire before the call returns.
    ///
    /// # Errors
    /// Returns `DuplicateRule`, a validation error, or whatever firing the
    /// primed activations raised (in which case the rule is not added).
    pub fn add_rule(&self, rule: Rule) -> Result<Outcome> {
        self.mutate(|state, call| {
            if state.rules.contains_key(&rule.name) {
                return Err(Error::new(ErrorKind::DuplicateRule(rule.name.to_string())));
            }
            validate_rule(&rule, &state.types, &state.actions)?;
            let rule = Arc::new(rule);
            let stats = state.install_rule(rule.clone(), Install::Compile(call))?;
            call.log.push(Command::AddRule { rule, stats });
            Ok(())
        })
        .map(|((), outcome)| outcome)
    }

    /// Removes a rule, pruning nodes no other rule uses.
    ///
    /// # Errors
    /// Returns `UnknownRule` if no rule has this name.
    pub fn remove_rule(&self, name: &str) -> Result<()> {
        self.mutate(|state, call| {
            let (rule, stats) = state.uninstall_rule(name)?;
            call.log.push(Command::RemoveRule { rule, stats });
            Ok(())
        })
        .map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Facts
    // -------------------------------------------------------------------------

    /// Stores a fact under its own id and propagates it.
    ///
    /// The fact's timestamp is replaced by the engine clock.
    ///
    /// # Errors
    /// Returns a schema error (the call is rolled back), `DuplicateFact`, or
    /// a limit error from the rules it triggered. The id `u64::MAX` is
    /// rejected with `FactIdsExhausted`.
    pub fn submit_fact(&self, fact: Fact) -> Result<Outcome> {
        self.mutate(|state, call| {
            let next = fact.id.raw().checked_add(1).ok_or_else(ids_exhausted)?;
            state.next_fact_id = state.next_fact_id.max(next);
            state.assert(fact, 0, call)
        })
        .map(|((), outcome)| outcome)
    }

    /// Stores a new fact with an engine-allocated id and propagates it.
    ///
    /// # Errors
    /// As [`Engine::submit_fact`].
    pub fn assert_fact(
        &self,
        type_name: impl Into<Arc<str>>,
        fields: FieldMap,
    ) -> Result<(FactId, Outcome)> {
        let type_name = type_name.into();
        self.mutate(|state, call| {
            let id = state.allocate_id()?;
            let mut fact = Fact::new(id, type_name);
            fact.fields = fields;
            state.assert(fact, 0, call)?;
            Ok(id)
        })
    }

    /// Removes a fact and every token built from it. No actions fire.
    ///
    /// # Errors
    /// Returns `FactNotFound`.
    pub fn retract_fact(&self, id: FactId) -> Result<()> {
        self.mutate(|state, call| state.retract(id, call)).map(|_| ())
    }

    /// Replaces fields of a fact, keeping its id.
    ///
    /// Every token built from the old version is removed before the new
    /// version propagates.
    ///
    /// # Errors
    /// Returns `FactNotFound`, a schema error, or a limit error.
    pub fn update_fact(&self, id: FactId, changes: FieldMap) -> Result<Outcome> {
        self.mutate(|state, call| state.update(id, &changes, 0, call))
            .map(|((), outcome)| outcome)
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Starts an explicit transaction and returns its id.
    ///
    /// # Errors
    /// Returns `TransactionActive` if one is already running.
    pub fn begin(&self) -> Result<u64> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        if let Some(tx) = &state.transaction {
            return Err(Error::new(ErrorKind::TransactionActive(tx.id())));
        }
        let id = state.next_transaction;
        state.next_transaction += 1;
        state.transaction = Some(Transaction::new(id));
        self.metrics.transaction_begun();
        state.record(TraceEvent::TransactionBegun { id });
        debug!(transaction = id, "transaction begun");
        Ok(id)
    }

    /// Keeps every change made since `begin`.
    ///
    /// # Errors
    /// Returns `NoActiveTransaction`.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        let tx = state
            .transaction
            .take()
            .ok_or_else(|| Error::new(ErrorKind::NoActiveTransaction))?;
        self.metrics.transaction_committed();
        state.record(TraceEvent::TransactionCommitted {
            id: tx.id(),
            commands: tx.len(),
        });
        debug!(transaction = tx.id(), commands = tx.len(), "transaction committed");
        Ok(())
    }

    /// Undoes every change made since `begin`, newest first.
    ///
    /// # Errors
    /// Returns `NoActiveTransaction`, or an invariant error (which poisons the
    /// engine) if an inverse cannot be applied.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        let tx = state
            .transaction
            .take()
            .ok_or_else(|| Error::new(ErrorKind::NoActiveTransaction))?;
        let (id, commands) = (tx.id(), tx.len());
        let result = state.undo(tx.into_inverses());
        state.poison_on_invariant(result)?;
        self.metrics.set_live_nodes(state.network.node_count());
        self.metrics.transaction_rolled_back();
        state.record(TraceEvent::TransactionRolledBack { id, commands });
        debug!(transaction = id, commands, "transaction rolled back");
        Ok(())
    }

    /// Memory held by the active transaction's commands, in bytes.
    #[must_use]
    pub fn transaction_footprint(&self) -> Option<usize> {
        self.state.read().transaction.as_ref().map(Transaction::footprint)
    }

    /// Id of the active transaction.
    #[must_use]
    pub fn active_transaction(&self) -> Option<u64> {
        self.state.read().transaction.as_ref().map(Transaction::id)
    }

    // -------------------------------------------------------------------------
    // Reset and collection
    // -------------------------------------------------------------------------

    /// Forgets every type, rule, and fact.
    ///
    /// The old nodes are detached from the root but stay allocated until
    /// [`Engine::collect`] runs, typically after the new types and rules are
    /// in place.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction is running.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        if let Some(tx) = &state.transaction {
            return Err(Error::new(ErrorKind::TransactionActive(tx.id())));
        }
        state.network.detach_all();
        state.rules.clear();
        self.metrics.rules_cleared();
        state.types.clear();
        state.store.clear();
        state.agenda.clear();
        info!(nodes = state.network.node_count(), "engine reset; detached nodes await collection");
        Ok(())
    }

    /// Frees every node unreachable from the root.
    ///
    /// # Errors
    /// Returns the poisoning error of a poisoned engine.
    pub fn collect(&self) -> Result<Collection> {
        let mut state = self.state.write();
        state.check_poisoned()?;
        let state = &mut *state;
        let collection = gc::collect(&mut state.network, &mut state.registry);
        self.metrics.record_collected(collection.count);
        self.metrics.record_phase(Phase::Collect, collection.duration);
        self.metrics.set_live_nodes(state.network.node_count());
        state.record(TraceEvent::NodesCollected {
            count: collection.count,
        });
        Ok(collection)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Every stored fact, in id order.
    #[must_use]
    pub fn facts(&self) -> Vec<Fact> {
        self.state.read().store.get_all_facts()
    }

    /// A stored fact.
    #[must_use]
    pub fn fact(&self, id: FactId) -> Option<Fact> {
        self.state.read().store.get_fact(id)
    }

    /// Tokens currently held by a rule's terminal node, in token order.
    ///
    /// # Errors
    /// Returns `UnknownRule`.
    pub fn activations(&self, rule: &str) -> Result<Vec<Token>> {
        let state = self.state.read();
        let entry = state.rule_entry(rule)?;
        Ok(state
            .network
            .activations(entry.terminal)
            .into_iter()
            .map(|(token, _)| token)
            .collect())
    }

    /// Names of compiled rules, sorted.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<str>> {
        self.state.read().rules.keys().cloned().collect()
    }

    /// Terminal node of a rule.
    #[must_use]
    pub fn terminal(&self, rule: &str) -> Option<NodeId> {
        self.state.read().rules.get(rule).map(|e| e.terminal)
    }

    /// Build statistics of a rule.
    #[must_use]
    pub fn rule_stats(&self, rule: &str) -> Option<BuildStats> {
        self.state.read().rules.get(rule).map(|e| e.stats)
    }

    /// Build statistics summed over every compilation since creation.
    #[must_use]
    pub fn cumulative_stats(&self) -> BuildStats {
        self.state.read().cumulative
    }

    /// Live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.read().network.node_count()
    }

    /// Returns true if `node` is live and reachable from the root.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.state.read().network.is_reachable(node)
    }

    /// Live node ids, in slot order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.state.read().network.arena().ids().collect()
    }

    /// Snapshot of every counter.
    ///
    /// Never takes the engine lock, so it returns promptly while another
    /// thread is inside a call.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::gather(&self.metrics, &self.normalize_counters, &self.registry_counters)
    }

    /// Recorded trace events, oldest first. Empty when tracing is off.
    #[must_use]
    pub fn trace(&self) -> Vec<TraceRecord> {
        self.state
            .read()
            .trace
            .as_ref()
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The error that poisoned this engine, if any.
    #[must_use]
    pub fn poisoned(&self) -> Option<Error> {
        self.state.read().poisoned.clone()
    }

    // -------------------------------------------------------------------------
    // Call execution
    // -------------------------------------------------------------------------

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut EngineState, &mut Call) -> Result<T>,
    ) -> Result<(T, Outcome)> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.check_poisoned()?;
        state.sequence += 1;

        let started = Instant::now();
        let mut call = Call::default();
        let result = match op(state, &mut call) {
            Ok(value) => state.fire_all(&mut call).map(|()| value),
            Err(err) => Err(err),
        };
        self.metrics.record_phase(Phase::Propagate, started.elapsed());
        self.metrics.set_live_nodes(state.network.node_count());

        match result {
            Ok(value) => {
                if let Some(tx) = &mut state.transaction {
                    tx.extend(call.log);
                }
                Ok((value, call.outcome))
            }
            Err(err) => {
                state.agenda.clear();
                if err.category() == ErrorCategory::Invariant {
                    state.poisoned = Some(err.clone());
                    return Err(err);
                }
                debug!(error = %err, commands = call.log.len(), "call failed; undoing");
                let undo = call.log.into_iter().rev().map(|c| c.inverse());
                if let Err(undo_err) = state.undo(undo) {
                    let fatal = Error::invariant(format!("undo after `{err}` failed: {undo_err}"));
                    state.poisoned = Some(fatal.clone());
                    return Err(fatal);
                }
                self.metrics.transaction_rolled_back();
                Err(err)
            }
        }
    }
}

impl EngineState {
    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn poison_on_invariant<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.category() == ErrorCategory::Invariant {
                self.poisoned = Some(err.clone());
            }
        }
        result
    }

    fn record(&mut self, event: TraceEvent) {
        let sequence = self.sequence;
        if let Some(trace) = &mut self.trace {
            trace.push(sequence, event);
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn allocate_id(&mut self) -> Result<FactId> {
        let next = self.next_fact_id.checked_add(1).ok_or_else(ids_exhausted)?;
        let id = FactId::new(self.next_fact_id);
        self.next_fact_id = next;
        Ok(id)
    }

    fn rule_entry(&self, rule: &str) -> Result<&RuleEntry> {
        self.rules
            .get(rule)
            .ok_or_else(|| Error::new(ErrorKind::UnknownRule(rule.to_string())))
    }

    fn attach_type(&mut self, name: &Arc<str>, definition: &TypeDefinition) -> Result<()> {
        self.network.ensure_type_node(name)?;
        let mut out = Propagation::default();
        let mut attached = 0;
        for fact in self.store.get_all_facts() {
            if fact.type_name == *name && definition.validate(&fact).is_ok() {
                self.network.assert_fact(&fact, &*self.store, &mut out)?;
                attached += 1;
            }
        }
        debug!(type_name = %name, facts = attached, "type attached");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    /// Compiles and primes a rule, returning the stats kept for it.
    fn install_rule(&mut self, rule: Arc<Rule>, install: Install<'_>) -> Result<BuildStats> {
        let started = Instant::now();
        let mut out = Propagation::default();
        let compiled = Builder::new(&mut self.network, &mut self.registry, &mut self.normalizer)
            .compile(&rule, &*self.store, &mut out)?;
        let (stats, call) = match install {
            Install::Compile(call) => {
                self.metrics.record_phase(Phase::Compile, started.elapsed());
                self.metrics.record_build(&compiled.stats);
                self.cumulative.absorb(&compiled.stats);
                self.record(TraceEvent::RuleAdded {
                    rule: rule.name.clone(),
                    nodes_created: compiled.stats.nodes_created,
                    nodes_reused: compiled.stats.nodes_reused,
                });
                (compiled.stats, Some(call))
            }
            Install::Restore(stats) => (stats, None),
        };
        self.metrics.rule_built(&rule.name, stats);
        self.rules.insert(
            rule.name.clone(),
            RuleEntry {
                rule,
                terminal: compiled.terminal,
                stats,
            },
        );
        if let Some(call) = call {
            self.absorb(out, 0, call);
        }
        Ok(stats)
    }

    fn uninstall_rule(&mut self, name: &str) -> Result<(Arc<Rule>, BuildStats)> {
        let entry = self
            .rules
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownRule(name.to_string())))?;
        let freed = self.network.prune(entry.terminal);
        self.registry.invalidate(&freed);
        self.metrics.rule_removed(name);
        debug!(rule = name, freed = freed.len(), "rule removed");
        self.record(TraceEvent::RuleRemoved {
            rule: entry.rule.name.clone(),
            nodes_freed: freed.len(),
        });
        Ok((entry.rule, entry.stats))
    }

    // -------------------------------------------------------------------------
    // Fact changes
    // -------------------------------------------------------------------------

    fn assert(&mut self, mut fact: Fact, depth: u32, call: &mut Call) -> Result<()> {
        let typed = self.types.validate(&fact, self.config.strict_types)?;
        fact.timestamp = self.tick();
        self.store.add_fact(fact.clone())?;
        call.log.push(Command::AssertFact { fact: fact.clone() });
        self.metrics.fact_asserted();
        self.record(TraceEvent::FactAsserted {
            fact: fact.id,
            type_name: fact.type_name.clone(),
        });

        if typed {
            let mut out = Propagation::default();
            self.network.assert_fact(&fact, &*self.store, &mut out)?;
            self.absorb(out, depth, call);
        }
        Ok(())
    }

    fn retract(&mut self, id: FactId, call: &mut Call) -> Result<()> {
        let fact = self.store.get_fact(id).ok_or_else(|| Error::fact_not_found(id))?;
        let removed = self.network.retract_fact(id);
        self.store.delete_fact(id)?;
        call.log.push(Command::RetractFact { fact });
        self.metrics.fact_retracted();
        self.record(TraceEvent::FactRetracted {
            fact: id,
            activations_removed: removed,
        });
        Ok(())
    }

    fn update(&mut self, id: FactId, changes: &FieldMap, depth: u32, call: &mut Call) -> Result<()> {
        let before = self.store.get_fact(id).ok_or_else(|| Error::fact_not_found(id))?;
        let after = before.merged(changes, self.clock + 1);
        let typed = self.types.validate(&after, self.config.strict_types)?;
        self.tick();

        self.network.retract_fact(id);
        self.store.delete_fact(id)?;
        self.store.add_fact(after.clone())?;
        call.log.push(Command::UpdateFact {
            before,
            after: after.clone(),
        });
        self.metrics.fact_updated();
        self.record(TraceEvent::FactUpdated { fact: id });

        if typed {
            let mut out = Propagation::default();
            self.network.assert_fact(&after, &*self.store, &mut out)?;
            self.absorb(out, depth, call);
        }
        Ok(())
    }

    /// Queues new activations and collects propagation errors.
    fn absorb(&mut self, out: Propagation, depth: u32, call: &mut Call) {
        call.outcome.errors.extend(out.errors);
        for new in out.activations {
            let salience = self.rules.get(&new.rule).map_or(0, |e| e.rule.salience);
            self.record(TraceEvent::RuleActivated {
                rule: new.rule.clone(),
                token: new.token.clone(),
            });
            self.agenda.push(Activation {
                rule: new.rule,
                salience,
                terminal: new.terminal,
                token: new.token,
                serial: new.serial,
                depth,
            });
        }
    }

    // -------------------------------------------------------------------------
    // Undo
    // -------------------------------------------------------------------------

    /// Applies inverse commands without queuing activations or recording.
    fn undo(&mut self, inverses: impl Iterator<Item = Command>) -> Result<()> {
        let started = Instant::now();
        for command in inverses {
            trace!(command = command.name(), "undo");
            self.apply_silently(command)?;
        }
        self.agenda.clear();
        self.metrics.record_phase(Phase::Rollback, started.elapsed());
        Ok(())
    }

    fn apply_silently(&mut self, command: Command) -> Result<()> {
        let mut scratch = Propagation::default();
        match command {
            Command::AssertFact { fact } => {
                self.store.add_fact(fact.clone())?;
                self.network.assert_fact(&fact, &*self.store, &mut scratch)?;
            }
            Command::RetractFact { fact } => {
                self.network.retract_fact(fact.id);
                self.store.delete_fact(fact.id)?;
            }
            Command::UpdateFact { before, after } => {
                self.network.retract_fact(before.id);
                self.store.delete_fact(before.id)?;
                self.store.add_fact(after.clone())?;
                self.network.assert_fact(&after, &*self.store, &mut scratch)?;
            }
            Command::AddRule { rule, stats } => {
                self.install_rule(rule, Install::Restore(stats))?;
            }
            Command::RemoveRule { rule, .. } => {
                self.uninstall_rule(&rule.name)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------------

    fn fire_all(&mut self, call: &mut Call) -> Result<()> {
        while let Some(activation) = self.agenda.pop() {
            if !self
                .network
                .is_live_activation(activation.terminal, &activation.token, activation.serial)
            {
                trace!(rule = %activation.rule, token = ?activation.token, "stale activation skipped");
                continue;
            }
            if call.outcome.fired >= self.config.max_activations {
                return Err(Error::limit_exceeded(SemanticLimit::MaxActivations {
                    limit: self.config.max_activations,
                    rule: Some(activation.rule.to_string()),
                }));
            }
            self.fire(&activation, call)?;
        }
        Ok(())
    }

    fn fire(&mut self, activation: &Activation, call: &mut Call) -> Result<()> {
        let rule = self.rule_entry(&activation.rule)?.rule.clone();
        let bindings =
            self.network
                .bindings(activation.terminal, &activation.token, &*self.store)?;
        let depth = activation.depth + 1;

        call.outcome.fired += 1;
        self.metrics.activation_fired();
        self.record(TraceEvent::RuleFired {
            rule: rule.name.clone(),
            token: activation.token.clone(),
            depth: activation.depth,
        });
        trace!(rule = %rule.name, token = ?activation.token, depth, "firing");

        for action in &rule.actions {
            self.run_action(&rule, action, &bindings, depth, call)?;
        }
        Ok(())
    }

    fn run_action(
        &mut self,
        rule: &Rule,
        action: &Action,
        bindings: &TokenBindings,
        depth: u32,
        call: &mut Call,
    ) -> Result<()> {
        let changes_facts = matches!(
            action,
            Action::Insert { .. } | Action::Retract { .. } | Action::Update { .. } | Action::Custom { .. }
        );
        if changes_facts && depth > self.config.max_chain_depth {
            return Err(Error::limit_exceeded(SemanticLimit::MaxChainDepth {
                limit: self.config.max_chain_depth,
                rule: Some(rule.name.to_string()),
            }));
        }

        match action {
            Action::Insert { type_name, fields } => {
                let Some(fields) = eval_fields(rule, action, fields, bindings, call) else {
                    return Ok(());
                };
                let mut fact = Fact::new(self.allocate_id()?, type_name.clone());
                fact.fields = fields;
                self.assert(fact, depth, call)?;
            }
            Action::Retract { var } => {
                let id = bound_id(bindings, var)?;
                if self.store.contains(id) {
                    self.retract(id, call)?;
                } else {
                    debug!(rule = %rule.name, fact = %id, "retract skipped; fact already gone");
                }
            }
            Action::Update { var, fields } => {
                let id = bound_id(bindings, var)?;
                let Some(fields) = eval_fields(rule, action, fields, bindings, call) else {
                    return Ok(());
                };
                if self.store.contains(id) {
                    self.update(id, &fields, depth, call)?;
                } else {
                    debug!(rule = %rule.name, fact = %id, "update skipped; fact already gone");
                }
            }
            Action::Log { message, args } => {
                if let Some(args) = eval_args(rule, action, args, bindings, call) {
                    info!(rule = %rule.name, "{}", render_message(message, &args));
                }
            }
            Action::Print { message, args } => {
                if let Some(args) = eval_args(rule, action, args, bindings, call) {
                    let line = render_message(message, &args);
                    info!(target: "trellis::print", rule = %rule.name, "{line}");
                    call.outcome.output.push(line);
                }
            }
            Action::Custom { name, args } => {
                let handler = self
                    .actions
                    .get(name)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownAction(name.to_string())))?;
                let Some(args) = eval_args(rule, action, args, bindings, call) else {
                    return Ok(());
                };
                let effects = handler.execute(&ActionContext {
                    rule: &rule.name,
                    action: name,
                    args: &args,
                    bindings,
                })?;
                for effect in effects {
                    self.apply_effect(rule, effect, depth, call)?;
                }
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, rule: &Rule, effect: ActionEffect, depth: u32, call: &mut Call) -> Result<()> {
        match effect {
            ActionEffect::Insert { type_name, fields } => {
                let mut fact = Fact::new(self.allocate_id()?, type_name);
                fact.fields = fields;
                self.assert(fact, depth, call)
            }
            ActionEffect::Retract(id) if self.store.contains(id) => self.retract(id, call),
            ActionEffect::Update { fact, fields } if self.store.contains(fact) => {
                self.update(fact, &fields, depth, call)
            }
            ActionEffect::Retract(id) | ActionEffect::Update { fact: id, .. } => {
                debug!(rule = %rule.name, fact = %id, "effect skipped; fact already gone");
                Ok(())
            }
            ActionEffect::Emit { name, value } => {
                call.outcome.emitted.push((name, value));
                Ok(())
            }
        }
    }
}

fn ids_exhausted() -> Error {
    Error::limit_exceeded(SemanticLimit::FactIdsExhausted)
}

fn bound_id(bindings: &TokenBindings, var: &str) -> Result<FactId> {
    bindings
        .iter()
        .find(|(name, _)| &**name == var)
        .map(|(_, fact)| fact.id)
        .ok_or_else(|| Error::invariant(format!("variable {var} missing from activation")))
}

fn action_failed(rule: &Rule, action: &Action, err: Error, call: &mut Call) {
    warn!(rule = %rule.name, action = action.name(), error = %err, "action skipped");
    let context = ErrorContext::new()
        .with_source(rule.name.to_string())
        .with_frame(action.name());
    call.outcome.errors.push(err.with_context(context));
}

fn eval_args(
    rule: &Rule,
    action: &Action,
    args: &[trellis_condition::Condition],
    bindings: &TokenBindings,
    call: &mut Call,
) -> Option<Vec<Value>> {
    match args
        .iter()
        .map(|arg| Evaluator::evaluate(arg, bindings))
        .collect::<Result<Vec<_>>>()
    {
        Ok(values) => Some(values),
        Err(err) => {
            action_failed(rule, action, err, call);
            None
        }
    }
}

fn eval_fields(
    rule: &Rule,
    action: &Action,
    fields: &FieldExprs,
    bindings: &TokenBindings,
    call: &mut Call,
) -> Option<FieldMap> {
    let mut map = FieldMap::new();
    for (name, expr) in fields {
        match Evaluator::evaluate(expr, bindings) {
            Ok(value) => {
                map.insert(name.clone(), value);
            }
            Err(err) => {
                action_failed(rule, action, err, call);
                return None;
            }
        }
    }
    Some(map)
}
