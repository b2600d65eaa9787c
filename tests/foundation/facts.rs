//! Integration tests for Fact and TypeDefinition
//!
//! Tests fact construction, merging, and schema validation.

use trellis_foundation::{ErrorKind, Fact, FactId, FieldMap, Type, TypeDefinition, Value};

fn person() -> TypeDefinition {
    TypeDefinition::new("Person")
        .with_field("name", Type::String)
        .with_field("age", Type::Int)
        .with_field("salary", Type::Float)
}

#[test]
fn fact_builder() {
    let fact = Fact::new(FactId::new(1), "Person")
        .with_field("name", "ann")
        .with_field("age", 30)
        .with_timestamp(9);

    assert_eq!(fact.get("age"), Some(&Value::Int(30)));
    assert_eq!(fact.get("missing"), None);
    assert_eq!(fact.timestamp, 9);
}

#[test]
fn merged_keeps_identity_and_untouched_fields() {
    let fact = Fact::new(FactId::new(1), "Person")
        .with_field("name", "ann")
        .with_field("age", 30);
    let changes = FieldMap::new().update("age".into(), Value::Int(31));

    let updated = fact.merged(&changes, 2);
    assert_eq!(updated.id, fact.id);
    assert_eq!(updated.get("age"), Some(&Value::Int(31)));
    assert_eq!(updated.get("name"), Some(&Value::from("ann")));
    assert_eq!(updated.timestamp, 2);
    assert_eq!(fact.get("age"), Some(&Value::Int(30)));
}

#[test]
fn footprint_grows_with_fields() {
    let small = Fact::new(FactId::new(1), "Person");
    let large = small.clone().with_field("name", "a long name for a person");
    assert!(large.footprint() > small.footprint());
}

#[test]
fn validation_accepts_partial_facts() {
    let fact = Fact::new(FactId::new(1), "Person").with_field("age", 5);
    assert!(person().validate(&fact).is_ok());
}

#[test]
fn validation_promotes_int_to_float() {
    let fact = Fact::new(FactId::new(1), "Person").with_field("salary", 50_000);
    assert!(person().validate(&fact).is_ok());
}

#[test]
fn validation_rejects_unknown_field() {
    let fact = Fact::new(FactId::new(1), "Person").with_field("height", 180);
    let err = person().validate(&fact).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));
}

#[test]
fn validation_rejects_mismatch() {
    let fact = Fact::new(FactId::new(1), "Person").with_field("age", "old");
    let err = person().validate(&fact).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::TypeMismatch {
            expected: Type::Int,
            actual: Type::String
        }
    ));
}
