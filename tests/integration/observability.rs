//! Observability integration tests
//!
//! Tests the trace buffer and the metrics snapshot.

use trellis::network::TraceEvent;
use trellis::{Engine, EngineConfig, ErrorKind, FieldMap, Value};

use crate::{adult_rule, person, register_people};

fn traced() -> Engine {
    let engine = Engine::with_config(EngineConfig::default().with_trace_capacity(Some(100)));
    register_people(&engine);
    engine
}

// =============================================================================
// Trace
// =============================================================================

#[test]
fn trace_records_a_firing_chain() {
    let engine = traced();
    engine.add_rule(adult_rule()).unwrap();
    let before = engine.trace().len();

    let (ann, _) = engine.assert_fact("Person", person("ann", 30)).unwrap();

    let records = engine.trace();
    let kinds: Vec<&str> = records[before..].iter().map(|r| r.event_type()).collect();
    assert_eq!(
        kinds,
        ["fact-asserted", "rule-activated", "rule-fired", "fact-asserted"]
    );
    assert!(matches!(
        &records[before].event,
        TraceEvent::FactAsserted { fact, .. } if *fact == ann
    ));
    assert!(records[before..].windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn trace_records_rule_compilation() {
    let engine = traced();
    engine.add_rule(adult_rule()).unwrap();

    let records = engine.trace();
    let added = records
        .iter()
        .find_map(|r| match &r.event {
            TraceEvent::RuleAdded {
                rule,
                nodes_created,
                ..
            } => Some((rule.clone(), *nodes_created)),
            _ => None,
        })
        .unwrap();
    assert_eq!(&*added.0, "adult");
    assert!(added.1 > 0);
}

#[test]
fn trace_records_transactions() {
    let engine = traced();
    let id = engine.begin().unwrap();
    engine.assert_fact("Person", person("ann", 30)).unwrap();
    engine.rollback().unwrap();

    let records = engine.trace();
    assert!(records
        .iter()
        .any(|r| r.event == TraceEvent::TransactionBegun { id }));
    assert!(records.iter().any(|r| matches!(
        r.event,
        TraceEvent::TransactionRolledBack { id: rolled, commands: 1 } if rolled == id
    )));
}

#[test]
fn trace_is_empty_when_disabled() {
    let engine = crate::people();
    engine.add_rule(adult_rule()).unwrap();
    engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert!(engine.trace().is_empty());
}

#[test]
fn trace_buffer_keeps_only_the_newest_records() {
    let engine = Engine::with_config(EngineConfig::default().with_trace_capacity(Some(3)));
    register_people(&engine);
    for age in 0..10 {
        engine.assert_fact("Person", person("p", age)).unwrap();
    }

    let records = engine.trace();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.event_type() == "fact-asserted"));
}

// =============================================================================
// Metrics
// =============================================================================

#[test]
fn metrics_count_fact_changes_and_firings() {
    let engine = crate::people();
    engine.add_rule(adult_rule()).unwrap();

    let (ann, _) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    engine.assert_fact("Person", person("kid", 5)).unwrap();
    engine
        .update_fact(ann, FieldMap::new().update("age".into(), Value::Int(31)))
        .unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.activations_fired, 2);
    assert_eq!(metrics.facts_updated, 1);
    assert!(metrics.facts_asserted >= 3);
    assert!(metrics.nodes_live > 1);
    assert!(metrics.rules.contains_key("adult"));
}

#[test]
fn metrics_report_cache_reuse() {
    let engine = crate::people();
    engine.add_rule(adult_rule()).unwrap();
    let mut twin = adult_rule();
    twin.name = "adult-twin".into();
    engine.add_rule(twin).unwrap();

    let metrics = engine.metrics();
    assert!(metrics.nodes_reused > 0);
    assert!(metrics.sharing_ratio > 0.0);
    assert!(metrics.normalize_cache.hits > 0);
    assert!(metrics.registry_cache.hits > 0);
}

#[test]
fn development_config_rejects_unknown_types() {
    let engine = Engine::with_config(EngineConfig::development());
    let err = engine.assert_fact("Ghost", FieldMap::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(_)));
    assert_eq!(engine.metrics().transactions_rolled_back, 1);
}
