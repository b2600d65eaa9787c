//! Integration tests for structural node sharing
//!
//! Tests that rules with equivalent conditions compile onto shared nodes and
//! that build statistics account for every reuse.

use trellis_condition::Condition;
use trellis_foundation::{CacheConfig, FieldMap, Type, TypeDefinition, Value};
use trellis_network::{Action, Engine, EngineConfig, Rule};

fn engine_with(config: EngineConfig) -> Engine {
    let engine = Engine::with_config(config);
    engine
        .register_type(
            TypeDefinition::new("Person")
                .with_field("age", Type::Int)
                .with_field("salary", Type::Int),
        )
        .unwrap();
    engine
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn rule(name: &str, conditions: Vec<Condition>) -> Rule {
    Rule::new(name)
        .with_pattern("p", "Person")
        .with_condition(Condition::and(conditions))
        .with_action(Action::log("matched {}", [Condition::var("p")]))
}

fn age_gt_18() -> Condition {
    Condition::field("p", "age").greater_than(18)
}

fn salary_at_least(n: i64) -> Condition {
    Condition::field("p", "salary").at_least(n)
}

// =============================================================================
// Prefix Sharing
// =============================================================================

#[test]
fn identical_rules_share_every_alpha_node() {
    let engine = engine();
    let baseline = engine.node_count();

    let rules = 5;
    for i in 0..rules {
        engine
            .add_rule(rule(&format!("r{i}"), vec![age_gt_18(), salary_at_least(50_000)]))
            .unwrap();
    }

    // Two shared alpha nodes plus one terminal per rule.
    assert_eq!(engine.node_count(), baseline + 2 + rules);
    assert_eq!(engine.rule_stats("r0").unwrap().nodes_reused, 0);
    for i in 1..rules {
        let stats = engine.rule_stats(&format!("r{i}")).unwrap();
        assert_eq!(stats.nodes_created, 1);
        assert_eq!(stats.nodes_reused, 2);
    }

    let cumulative = engine.cumulative_stats();
    assert_eq!(cumulative.nodes_created, 2 + rules);
    assert_eq!(cumulative.nodes_reused, 2 * (rules - 1));
}

#[test]
fn reordered_conditions_share() {
    let engine = engine();
    engine
        .add_rule(rule("a", vec![age_gt_18(), salary_at_least(50_000)]))
        .unwrap();
    engine
        .add_rule(rule("b", vec![salary_at_least(50_000), age_gt_18()]))
        .unwrap();

    assert_eq!(engine.rule_stats("b").unwrap().nodes_reused, 2);
}

#[test]
fn diverging_rules_share_the_common_prefix() {
    let engine = engine();
    engine
        .add_rule(rule("a", vec![age_gt_18(), salary_at_least(50_000)]))
        .unwrap();
    engine
        .add_rule(rule("b", vec![age_gt_18(), salary_at_least(60_000)]))
        .unwrap();

    let stats = engine.rule_stats("b").unwrap();
    assert_eq!(stats.nodes_reused, 1);
    assert_eq!(stats.nodes_created, 2);
}

#[test]
fn sharing_survives_an_empty_registry() {
    let config = EngineConfig::default().with_registry_cache(CacheConfig::with_capacity(0));
    let engine = engine_with(config);
    let baseline = engine.node_count();

    engine.add_rule(rule("a", vec![age_gt_18()])).unwrap();
    engine.add_rule(rule("b", vec![age_gt_18()])).unwrap();

    assert_eq!(engine.node_count(), baseline + 3);
    assert_eq!(engine.rule_stats("b").unwrap().nodes_reused, 1);
}

#[test]
fn shared_nodes_feed_every_rule() {
    let engine = engine();
    for name in ["a", "b", "c"] {
        engine.add_rule(rule(name, vec![age_gt_18()])).unwrap();
    }

    let (_, outcome) = engine
        .assert_fact("Person", FieldMap::new().update("age".into(), Value::Int(30)))
        .unwrap();
    assert_eq!(outcome.fired, 3);
    for name in ["a", "b", "c"] {
        assert_eq!(engine.activations(name).unwrap().len(), 1);
    }
}

#[test]
fn sharing_ratio_is_reported() {
    let engine = engine();
    engine.add_rule(rule("a", vec![age_gt_18()])).unwrap();
    engine.add_rule(rule("b", vec![age_gt_18()])).unwrap();

    // Created: alpha + 2 terminals; reused: alpha once.
    let metrics = engine.metrics();
    assert_eq!(metrics.nodes_created, 3);
    assert_eq!(metrics.nodes_reused, 1);
    assert!((metrics.sharing_ratio - 0.25).abs() < f64::EPSILON);
    assert_eq!(metrics.rules.len(), 2);
}

// =============================================================================
// Join Sharing
// =============================================================================

#[test]
fn identical_joins_share() {
    let engine = engine();
    engine
        .register_type(TypeDefinition::new("Badge").with_field("owner_age", Type::Int))
        .unwrap();
    let join = |name: &str| {
        Rule::new(name)
            .with_pattern("p", "Person")
            .with_pattern("b", "Badge")
            .with_condition(Condition::field("b", "owner_age").equals(Condition::field("p", "age")))
            .with_action(Action::log("badge", []))
    };

    engine.add_rule(join("a")).unwrap();
    engine.add_rule(join("b")).unwrap();

    let stats = engine.rule_stats("b").unwrap();
    assert_eq!(stats.nodes_reused, 1);
    assert_eq!(stats.nodes_created, 1);
}
