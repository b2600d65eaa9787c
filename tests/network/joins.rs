//! Integration tests for beta joins
//!
//! Tests correlated-field joins, order independence, self-joins, and
//! retraction through joins.

use trellis_condition::Condition;
use trellis_foundation::{FactId, FieldMap, Type, TypeDefinition, Value};
use trellis_network::{Action, Engine, Rule};

fn ints(pairs: &[(&str, i64)]) -> FieldMap {
    pairs
        .iter()
        .map(|(name, value)| (std::sync::Arc::<str>::from(*name), Value::Int(*value)))
        .collect()
}

fn engine() -> Engine {
    let engine = Engine::new();
    engine
        .register_type(
            TypeDefinition::new("Customer")
                .with_field("id", Type::Int)
                .with_field("tier", Type::Int),
        )
        .unwrap();
    engine
        .register_type(
            TypeDefinition::new("Order")
                .with_field("customer", Type::Int)
                .with_field("total", Type::Int),
        )
        .unwrap();
    engine
}

fn orders_rule() -> Rule {
    Rule::new("customer-order")
        .with_pattern("c", "Customer")
        .with_pattern("o", "Order")
        .with_condition(Condition::field("o", "customer").equals(Condition::field("c", "id")))
        .with_action(Action::log("order {} for {}", [Condition::var("o"), Condition::var("c")]))
}

#[test]
fn join_matches_on_correlated_field() {
    let engine = engine();
    engine.add_rule(orders_rule()).unwrap();

    let (alice, _) = engine.assert_fact("Customer", ints(&[("id", 1)])).unwrap();
    engine.assert_fact("Customer", ints(&[("id", 2)])).unwrap();
    let (order, outcome) = engine
        .assert_fact("Order", ints(&[("customer", 1), ("total", 10)]))
        .unwrap();

    assert_eq!(outcome.fired, 1);
    let tokens = engine.activations("customer-order").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].facts(), [alice, order]);
}

#[test]
fn join_is_order_independent() {
    let engine = engine();
    engine.add_rule(orders_rule()).unwrap();

    // Order first: the customer arrives later and left-activates the join.
    engine
        .assert_fact("Order", ints(&[("customer", 7), ("total", 10)]))
        .unwrap();
    let (_, outcome) = engine.assert_fact("Customer", ints(&[("id", 7)])).unwrap();

    assert_eq!(outcome.fired, 1);
    assert_eq!(engine.activations("customer-order").unwrap().len(), 1);
}

#[test]
fn retracting_either_side_removes_the_token() {
    let engine = engine();
    engine.add_rule(orders_rule()).unwrap();
    let (customer, _) = engine.assert_fact("Customer", ints(&[("id", 1)])).unwrap();
    let (order, _) = engine
        .assert_fact("Order", ints(&[("customer", 1), ("total", 10)]))
        .unwrap();

    engine.retract_fact(customer).unwrap();
    assert!(engine.activations("customer-order").unwrap().is_empty());

    // Re-adding the customer rebuilds the token from the order still held.
    let (again, _) = engine.assert_fact("Customer", ints(&[("id", 1)])).unwrap();
    assert_eq!(engine.activations("customer-order").unwrap()[0].facts(), [again, order]);

    engine.retract_fact(order).unwrap();
    assert!(engine.activations("customer-order").unwrap().is_empty());
}

#[test]
fn join_tests_beyond_equality() {
    let engine = engine();
    engine
        .add_rule(
            Rule::new("big-spender")
                .with_pattern("c", "Customer")
                .with_pattern("o", "Order")
                .with_condition(Condition::and([
                    Condition::field("o", "customer").equals(Condition::field("c", "id")),
                    Condition::field("o", "total").greater_than(Condition::field("c", "tier")),
                ]))
                .with_action(Action::log("big", [])),
        )
        .unwrap();

    engine
        .assert_fact("Customer", ints(&[("id", 1), ("tier", 100)]))
        .unwrap();
    let (_, small) = engine
        .assert_fact("Order", ints(&[("customer", 1), ("total", 50)]))
        .unwrap();
    let (_, large) = engine
        .assert_fact("Order", ints(&[("customer", 1), ("total", 500)]))
        .unwrap();

    assert_eq!(small.fired, 0);
    assert_eq!(large.fired, 1);
}

#[test]
fn three_way_join() {
    let engine = engine();
    engine
        .register_type(TypeDefinition::new("Shipment").with_field("order_total", Type::Int))
        .unwrap();
    engine
        .add_rule(
            Rule::new("shipped")
                .with_pattern("c", "Customer")
                .with_pattern("o", "Order")
                .with_pattern("s", "Shipment")
                .with_condition(Condition::and([
                    Condition::field("o", "customer").equals(Condition::field("c", "id")),
                    Condition::field("s", "order_total").equals(Condition::field("o", "total")),
                ]))
                .with_action(Action::log("shipped", [])),
        )
        .unwrap();

    let (s, _) = engine
        .assert_fact("Shipment", ints(&[("order_total", 30)]))
        .unwrap();
    let (c, _) = engine.assert_fact("Customer", ints(&[("id", 4)])).unwrap();
    let (o, outcome) = engine
        .assert_fact("Order", ints(&[("customer", 4), ("total", 30)]))
        .unwrap();

    assert_eq!(outcome.fired, 1);
    assert_eq!(engine.activations("shipped").unwrap()[0].facts(), [c, o, s]);
}

#[test]
fn self_join_produces_each_pair_once() {
    let engine = engine();
    engine
        .add_rule(
            Rule::new("same-tier")
                .with_pattern("a", "Customer")
                .with_pattern("b", "Customer")
                .with_condition(Condition::field("a", "tier").equals(Condition::field("b", "tier")))
                .with_action(Action::log("pair", [])),
        )
        .unwrap();

    let (x, _) = engine
        .assert_fact("Customer", ints(&[("id", 1), ("tier", 2)]))
        .unwrap();
    let (y, _) = engine
        .assert_fact("Customer", ints(&[("id", 2), ("tier", 2)]))
        .unwrap();
    engine
        .assert_fact("Customer", ints(&[("id", 3), ("tier", 9)]))
        .unwrap();

    let mut pairs: Vec<Vec<FactId>> = engine
        .activations("same-tier")
        .unwrap()
        .iter()
        .map(|t| t.facts().to_vec())
        .collect();
    pairs.sort();
    // A fact pairs with itself as well; no pair appears twice.
    let z = FactId::new(3);
    let mut expected = vec![vec![x, x], vec![x, y], vec![y, x], vec![y, y], vec![z, z]];
    expected.sort();
    assert_eq!(pairs, expected);
}
