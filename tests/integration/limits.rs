//! Loop guard integration tests
//!
//! Tests the chain depth and activation limits and that exceeding them
//! rolls the call back without harming the engine.

use trellis::condition::ArithOp;
use trellis::foundation::SemanticLimit;
use trellis::storage::{FactStore, MemoryStore};
use trellis::{
    Action, Condition, Engine, EngineConfig, ErrorKind, Fact, FactId, FieldMap, Rule, Type,
    TypeDefinition, Value,
};

use crate::{people, person};

fn counter_engine(config: EngineConfig, step: i64, condition: Option<Condition>) -> Engine {
    let engine = Engine::with_config(config);
    engine
        .register_type(TypeDefinition::new("Counter").with_field("n", Type::Int))
        .unwrap();
    let mut rule = Rule::new("step").with_pattern("c", "Counter").with_action(Action::update(
        "c",
        [("n", Condition::field("c", "n").arith(ArithOp::Add, step))],
    ));
    if let Some(condition) = condition {
        rule = rule.with_condition(condition);
    }
    engine.add_rule(rule).unwrap();
    engine
}

fn counter(n: i64) -> FieldMap {
    FieldMap::new().update("n".into(), Value::Int(n))
}

#[test]
fn runaway_chain_hits_the_depth_limit() {
    let engine = counter_engine(EngineConfig::default().with_max_chain_depth(5), 1, None);

    let err = engine.assert_fact("Counter", counter(0)).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::LimitExceeded(SemanticLimit::MaxChainDepth { limit: 5, .. })
    ));
    assert!(engine.facts().is_empty());
}

#[test]
fn terminating_chain_runs_to_completion() {
    let condition = Condition::field("c", "n").greater_than(0);
    let engine = counter_engine(EngineConfig::default(), -1, Some(condition));

    let (id, outcome) = engine.assert_fact("Counter", counter(10)).unwrap();
    assert_eq!(outcome.fired, 10);
    assert_eq!(engine.fact(id).unwrap().get("n"), Some(&Value::Int(0)));
}

#[test]
fn activation_limit_is_per_call() {
    let engine = Engine::with_config(EngineConfig::default().with_max_activations(2));
    engine
        .register_type(TypeDefinition::new("Item").with_field("n", Type::Int))
        .unwrap();
    engine.register_type(TypeDefinition::new("Tag")).unwrap();
    engine
        .add_rule(
            Rule::new("tagged")
                .with_pattern("t", "Tag")
                .with_pattern("i", "Item")
                .with_action(Action::print("tagged {}", [Condition::var("i")])),
        )
        .unwrap();
    for n in 0..3 {
        engine
            .assert_fact("Item", FieldMap::new().update("n".into(), Value::Int(n)))
            .unwrap();
    }

    let err = engine.assert_fact("Tag", FieldMap::new()).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::LimitExceeded(SemanticLimit::MaxActivations { limit: 2, .. })
    ));
    assert_eq!(engine.facts().len(), 3);
    assert!(engine.activations("tagged").unwrap().is_empty());
}

#[test]
fn engine_stays_usable_after_a_limit() {
    let engine = counter_engine(EngineConfig::default().with_max_chain_depth(3), 1, None);
    assert!(engine.assert_fact("Counter", counter(0)).is_err());
    assert!(engine.poisoned().is_none());

    engine.begin().unwrap();
    engine.commit().unwrap();
    assert_eq!(engine.rules().len(), 1);
}

// =============================================================================
// Fact Ids
// =============================================================================

fn ids_exhausted(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::LimitExceeded(SemanticLimit::FactIdsExhausted)
    )
}

#[test]
fn submitting_the_last_id_is_rejected() {
    let engine = people();
    let fact = Fact::new(FactId::new(u64::MAX), "Person").with_field("age", 1);

    let err = engine.submit_fact(fact).unwrap_err();
    assert!(ids_exhausted(&err.kind));
    assert!(engine.facts().is_empty());
    assert_eq!(engine.metrics().transactions_rolled_back, 1);
}

#[test]
fn allocation_stops_short_of_the_last_id() {
    let engine = people();
    engine
        .submit_fact(Fact::new(FactId::new(u64::MAX - 2), "Person").with_field("age", 1))
        .unwrap();

    let (id, _) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(id, FactId::new(u64::MAX - 1));

    let err = engine.assert_fact("Person", person("bob", 40)).unwrap_err();
    assert!(ids_exhausted(&err.kind));
    assert_eq!(engine.facts().len(), 2);
}

#[test]
fn seeded_store_at_the_last_id_cannot_allocate() {
    let mut store = MemoryStore::new();
    store
        .add_fact(Fact::new(FactId::new(u64::MAX), "Person"))
        .unwrap();
    let engine = Engine::with_store(EngineConfig::default(), Box::new(store));

    let err = engine.assert_fact("Person", FieldMap::new()).unwrap_err();
    assert!(ids_exhausted(&err.kind));
    assert_eq!(engine.facts().len(), 1);
}
