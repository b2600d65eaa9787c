//! Integration tests for garbage collection
//!
//! Tests reset, rebuild, and reclamation of detached nodes.

use std::collections::HashSet;

use trellis_condition::Condition;
use trellis_foundation::{ErrorKind, FieldMap, Type, TypeDefinition, Value};
use trellis_network::{Action, Engine, NodeId, Rule};

fn build(engine: &Engine, type_name: &str) {
    engine
        .register_type(
            TypeDefinition::new(type_name)
                .with_field("x", Type::Int)
                .with_field("y", Type::Int),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new(format!("{type_name}-positive"))
                .with_pattern("a", type_name)
                .with_condition(Condition::field("a", "x").greater_than(0))
                .with_action(Action::log("positive", [])),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new(format!("{type_name}-pair"))
                .with_pattern("a", type_name)
                .with_pattern("b", type_name)
                .with_condition(Condition::field("a", "x").equals(Condition::field("b", "y")))
                .with_action(Action::log("pair", [])),
        )
        .unwrap();
}

#[test]
fn nothing_is_collected_from_a_live_network() {
    let engine = Engine::new();
    build(&engine, "A");
    let before = engine.node_count();

    let collection = engine.collect().unwrap();
    assert_eq!(collection.count, 0);
    assert_eq!(engine.node_count(), before);
}

#[test]
fn rebuild_with_disjoint_types_frees_the_old_network() {
    let engine = Engine::new();
    build(&engine, "A");
    let old: Vec<NodeId> = engine.node_ids();
    let root = old[0];

    engine.reset().unwrap();
    build(&engine, "B");
    let collection = engine.collect().unwrap();

    // Everything but the root was discarded.
    assert_eq!(collection.count, old.len() - 1);
    for id in old.iter().filter(|id| **id != root) {
        assert!(!engine.is_reachable(*id));
        assert!(collection.freed.contains(id));
    }
    assert_eq!(engine.metrics().nodes_collected, old.len() - 1);
}

#[test]
fn rebuild_with_the_same_types_never_reuses_detached_nodes() {
    let engine = Engine::new();
    build(&engine, "A");
    let old: HashSet<NodeId> = engine.node_ids().into_iter().collect();

    engine.reset().unwrap();
    build(&engine, "A");
    let new: HashSet<NodeId> = engine.node_ids().into_iter().collect::<HashSet<_>>();
    let fresh: Vec<&NodeId> = new.difference(&old).collect();
    assert!(!fresh.is_empty());

    let collection = engine.collect().unwrap();
    assert_eq!(collection.count, old.len() - 1);

    // The rebuilt rules still work after collection.
    let (_, outcome) = engine
        .assert_fact("A", FieldMap::new().update("x".into(), Value::Int(1)))
        .unwrap();
    assert_eq!(outcome.fired, 1);
    assert_eq!(engine.rules().len(), 2);
}

#[test]
fn reset_forgets_facts_rules_and_types() {
    let engine = Engine::new();
    build(&engine, "A");
    engine
        .assert_fact("A", FieldMap::new().update("x".into(), Value::Int(1)))
        .unwrap();

    engine.reset().unwrap();
    assert!(engine.facts().is_empty());
    assert!(engine.rules().is_empty());
    let err = engine
        .add_rule(Rule::new("late").with_pattern("a", "A"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(_)));
}

#[test]
fn removing_a_rule_keeps_shared_nodes() {
    let engine = Engine::new();
    build(&engine, "A");
    engine
        .add_rule(
            Rule::new("also-positive")
                .with_pattern("a", "A")
                .with_condition(Condition::field("a", "x").greater_than(0))
                .with_action(Action::log("again", [])),
        )
        .unwrap();
    let with_both = engine.node_count();

    engine.remove_rule("A-positive").unwrap();
    // Only the terminal goes; the alpha node still feeds `also-positive`.
    assert_eq!(engine.node_count(), with_both - 1);
    let (_, outcome) = engine
        .assert_fact("A", FieldMap::new().update("x".into(), Value::Int(3)))
        .unwrap();
    assert_eq!(outcome.fired, 1);
}
