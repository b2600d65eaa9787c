//! Action integration tests
//!
//! Tests the built-in actions, firing order, and custom action handlers.

use trellis::network::{ActionContext, ActionEffect};
use trellis::{Action, Condition, Error, ErrorKind, FactId, FieldMap, Result, Rule, Value};

use crate::{adult_rule, count_of, people, person};

// =============================================================================
// Built-in Actions
// =============================================================================

#[test]
fn insert_binds_the_matched_fact() {
    let engine = people();
    engine.add_rule(adult_rule()).unwrap();

    let (ann, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(outcome.fired, 1);
    let adult = engine
        .facts()
        .into_iter()
        .find(|f| &*f.type_name == "Adult")
        .unwrap();
    assert_eq!(adult.get("person"), Some(&Value::FactRef(ann)));
}

#[test]
fn retract_action_removes_the_fact() {
    let engine = people();
    engine
        .add_rule(
            Rule::new("implausible")
                .with_pattern("p", "Person")
                .with_condition(Condition::field("p", "age").greater_than(150))
                .with_action(Action::retract("p")),
        )
        .unwrap();

    let (id, outcome) = engine.assert_fact("Person", person("old", 200)).unwrap();
    assert_eq!(outcome.fired, 1);
    assert!(engine.fact(id).is_none());
}

#[test]
fn update_action_chains_into_other_rules() {
    let engine = people();
    engine.add_rule(adult_rule()).unwrap();
    engine
        .add_rule(
            Rule::new("birthday")
                .with_pattern("p", "Person")
                .with_condition(Condition::field("p", "age").equals(17))
                .with_action(Action::update(
                    "p",
                    [(
                        "age",
                        Condition::field("p", "age").arith(trellis::condition::ArithOp::Add, 1),
                    )],
                )),
        )
        .unwrap();

    let (id, outcome) = engine.assert_fact("Person", person("kid", 17)).unwrap();
    assert_eq!(outcome.fired, 2);
    assert_eq!(engine.fact(id).unwrap().get("age"), Some(&Value::Int(18)));
    assert_eq!(count_of(&engine, "Adult"), 1);
}

#[test]
fn print_renders_arguments() {
    let engine = people();
    engine
        .add_rule(
            Rule::new("greet")
                .with_pattern("p", "Person")
                .with_action(Action::print(
                    "{} is {}",
                    [Condition::field("p", "name"), Condition::field("p", "age")],
                )),
        )
        .unwrap();

    let (_, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(outcome.output, ["ann is 30"]);
}

#[test]
fn failing_action_expression_skips_only_that_action() {
    let engine = people();
    engine
        .add_rule(
            Rule::new("greet")
                .with_pattern("p", "Person")
                .with_action(Action::print("hello {}", [Condition::field("p", "name")]))
                .with_action(Action::print("done", [])),
        )
        .unwrap();

    // No name field: the first print fails to evaluate.
    let nameless = FieldMap::new().update("age".into(), Value::Int(3));
    let (_, outcome) = engine.assert_fact("Person", nameless).unwrap();
    assert_eq!(outcome.output, ["done"]);
    assert_eq!(outcome.errors.len(), 1);
    let context = outcome.errors[0].context.as_ref().unwrap();
    assert_eq!(context.source.as_deref(), Some("greet"));
}

// =============================================================================
// Firing Order
// =============================================================================

#[test]
fn higher_salience_fires_first() {
    let engine = people();
    for (name, salience) in [("low", 1), ("high", 10), ("mid", 5)] {
        engine
            .add_rule(
                Rule::new(name)
                    .with_pattern("p", "Person")
                    .with_salience(salience)
                    .with_action(Action::print(name, [])),
            )
            .unwrap();
    }

    let (_, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(outcome.output, ["high", "mid", "low"]);
}

#[test]
fn retracted_activations_never_fire() {
    let engine = people();
    engine
        .add_rule(
            Rule::new("gate")
                .with_pattern("p", "Person")
                .with_salience(10)
                .with_action(Action::retract("p")),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new("greet")
                .with_pattern("p", "Person")
                .with_action(Action::print("hello", [])),
        )
        .unwrap();

    let (_, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(outcome.fired, 1);
    assert!(outcome.output.is_empty());
    assert_eq!(count_of(&engine, "Person"), 0);
}

// =============================================================================
// Custom Actions
// =============================================================================

fn announce(ctx: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
    Ok(vec![ActionEffect::Emit {
        name: ctx.action.into(),
        value: ctx.args[0].clone(),
    }])
}

fn tag_adult(ctx: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
    let person = ctx
        .fact("p")
        .ok_or_else(|| Error::evaluation("p is unbound"))?;
    Ok(vec![ActionEffect::Insert {
        type_name: "Adult".into(),
        fields: FieldMap::new().update("person".into(), Value::FactRef(person.id)),
    }])
}

fn refuse(_: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
    Err(Error::evaluation("refused"))
}

fn custom_rule(name: &str, action: &str) -> Rule {
    Rule::new(name)
        .with_pattern("p", "Person")
        .with_action(Action::custom(action, [Condition::field("p", "name")]))
}

#[test]
fn custom_handler_emits_values() {
    let engine = people();
    engine.register_action("announce", announce);
    engine.add_rule(custom_rule("shout", "announce")).unwrap();

    let (_, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(outcome.emitted.len(), 1);
    assert_eq!(&*outcome.emitted[0].0, "announce");
    assert_eq!(outcome.emitted[0].1, Value::from("ann"));
}

#[test]
fn custom_handler_effects_are_applied() {
    let engine = people();
    engine.register_action("tag_adult", tag_adult);
    engine.add_rule(custom_rule("tag", "tag_adult")).unwrap();

    let (ann, _) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    let adult = engine
        .facts()
        .into_iter()
        .find(|f| &*f.type_name == "Adult")
        .unwrap();
    assert_eq!(adult.get("person"), Some(&Value::FactRef(ann)));
}

#[test]
fn custom_handler_error_undoes_the_call() {
    let engine = people();
    engine.register_action("refuse", refuse);
    engine.add_rule(custom_rule("deny", "refuse")).unwrap();

    let err = engine.assert_fact("Person", person("ann", 30)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Evaluation(_)));
    assert!(engine.facts().is_empty());
}

#[test]
fn unknown_custom_action_is_rejected_at_compile_time() {
    let engine = people();
    let err = engine.add_rule(custom_rule("x", "missing")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownAction(_)));
    assert!(engine.rules().is_empty());
}

#[test]
fn effects_on_vanished_facts_are_skipped() {
    fn retract_first(_: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
        Ok(vec![
            ActionEffect::Retract(FactId::new(1)),
            ActionEffect::Retract(FactId::new(1)),
        ])
    }

    let engine = people();
    engine.register_action("retract_first", retract_first);
    engine.add_rule(custom_rule("r", "retract_first")).unwrap();

    let (id, outcome) = engine.assert_fact("Person", person("ann", 30)).unwrap();
    assert_eq!(id, FactId::new(1));
    assert_eq!(outcome.fired, 1);
    assert!(engine.facts().is_empty());
}
