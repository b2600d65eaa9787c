//! Integration tests for Value and Type
//!
//! Tests conversions, comparison, loose numeric equality, and type acceptance.

use std::cmp::Ordering;

use trellis_foundation::{FactId, Type, Value};

// =============================================================================
// Conversions
// =============================================================================

#[test]
fn value_from_primitives() {
    assert_eq!(Value::from(3_i64), Value::Int(3));
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from("ann").as_str(), Some("ann"));
    assert_eq!(Value::from(FactId::new(7)).as_fact_ref(), Some(FactId::new(7)));
}

#[test]
fn value_types() {
    assert_eq!(Value::Nil.value_type(), Type::Nil);
    assert_eq!(Value::Float(1.5).value_type(), Type::Float);
    assert_eq!(Value::from("x").value_type(), Type::String);
}

// =============================================================================
// Comparison
// =============================================================================

#[test]
fn compare_same_types() {
    assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
    assert_eq!(
        Value::from("b").compare(&Value::from("a")),
        Some(Ordering::Greater)
    );
}

#[test]
fn compare_mixed_numbers() {
    assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
    assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
    assert_ne!(Value::Int(2), Value::Float(2.0));
}

#[test]
fn compare_incompatible_is_none() {
    assert_eq!(Value::from("1").compare(&Value::Int(1)), None);
    assert!(!Value::from("1").loose_eq(&Value::Int(1)));
}

#[test]
fn display_is_plain() {
    assert_eq!(Value::from("ann").to_string(), "ann");
    assert_eq!(Value::FactRef(FactId::new(4)).to_string(), "#4");
    assert_eq!(Value::Nil.to_string(), "nil");
}

// =============================================================================
// Type Acceptance
// =============================================================================

#[test]
fn float_accepts_int() {
    assert!(Type::Float.accepts(&Type::Int));
    assert!(!Type::Int.accepts(&Type::Float));
}

#[test]
fn option_accepts_nil() {
    let ty = Type::option(Type::String);
    assert!(ty.accepts(&Type::Nil));
    assert!(ty.accepts(&Type::String));
    assert!(!ty.accepts(&Type::Int));
}

#[test]
fn any_accepts_everything() {
    for ty in [Type::Nil, Type::Bool, Type::Int, Type::FactRef] {
        assert!(Type::Any.accepts(&ty));
    }
}
