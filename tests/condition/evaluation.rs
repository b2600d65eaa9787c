//! Integration tests for condition evaluation
//!
//! Tests evaluation against single facts and token bindings, and the errors
//! that abort a propagation path.

use std::sync::Arc;

use trellis_condition::{ArithOp, Condition, Evaluator, Single};
use trellis_foundation::{ErrorKind, Fact, FactId, Value};

fn ann() -> Fact {
    Fact::new(FactId::new(1), "Person")
        .with_field("name", "ann")
        .with_field("age", 30)
        .with_field("salary", 50_000.0)
}

#[test]
fn comparison_against_single_fact() {
    let fact = ann();
    let bindings = Single::new("p", &fact);
    assert!(Evaluator::test(&Condition::field("p", "age").at_least(18), &bindings).unwrap());
    assert!(!Evaluator::test(&Condition::field("p", "age").less_than(18), &bindings).unwrap());
}

#[test]
fn int_and_float_compare_numerically() {
    let fact = ann();
    let bindings = Single::new("p", &fact);
    let condition = Condition::field("p", "salary").equals(50_000);
    assert!(Evaluator::test(&condition, &bindings).unwrap());
}

#[test]
fn connectives_short_circuit() {
    let fact = ann();
    let bindings = Single::new("p", &fact);
    // The second operand would fail; `or` never reaches it.
    let condition = Condition::or([
        Condition::field("p", "age").greater_than(0),
        Condition::field("p", "missing").greater_than(0),
    ]);
    assert!(Evaluator::test(&condition, &bindings).unwrap());
}

#[test]
fn var_evaluates_to_fact_ref() {
    let fact = ann();
    let value = Evaluator::evaluate(&Condition::var("p"), &Single::new("p", &fact)).unwrap();
    assert_eq!(value, Value::FactRef(FactId::new(1)));
}

#[test]
fn token_bindings_resolve_every_variable() {
    let order = Fact::new(FactId::new(2), "Order").with_field("customer", 1);
    let bindings: Vec<(Arc<str>, Fact)> = vec![("c".into(), ann()), ("o".into(), order)];
    let join = Condition::field("o", "customer").equals(Condition::field("c", "age").arith(ArithOp::Sub, 29));
    assert!(Evaluator::test(&join, &bindings).unwrap());
}

#[test]
fn missing_field_is_an_evaluation_error() {
    let fact = ann();
    let err = Evaluator::test(&Condition::field("p", "height").greater_than(1), &Single::new("p", &fact))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Evaluation(_)));
}

#[test]
fn incompatible_comparison_is_an_error() {
    let fact = ann();
    let err = Evaluator::test(&Condition::field("p", "name").greater_than(3), &Single::new("p", &fact))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Evaluation(_)));
}

#[test]
fn unbound_variable_is_an_error() {
    let fact = ann();
    assert!(Evaluator::evaluate(&Condition::field("q", "age"), &Single::new("p", &fact)).is_err());
}

#[test]
fn division_by_zero() {
    let fact = ann();
    let err = Evaluator::evaluate(
        &Condition::field("p", "age").arith(ArithOp::Div, 0),
        &Single::new("p", &fact),
    )
    .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DivisionByZero));
}

#[test]
fn non_boolean_test_is_an_error() {
    let fact = ann();
    assert!(Evaluator::test(&Condition::field("p", "age"), &Single::new("p", &fact)).is_err());
}
