//! Concurrency integration tests
//!
//! Tests that one engine can be shared between threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use trellis::network::{ActionContext, ActionEffect};
use trellis::{Action, Engine, Error, Result, Rule};

use crate::{adult_rule, count_of, people, person};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn engine_is_send_and_sync() {
    assert_send_sync::<Engine>();
}

#[test]
fn concurrent_writers_serialize() {
    let engine = people();
    engine.add_rule(adult_rule()).unwrap();

    thread::scope(|scope| {
        for t in 0..4 {
            let engine = &engine;
            scope.spawn(move || {
                for i in 0..25 {
                    let name = format!("p{t}-{i}");
                    engine.assert_fact("Person", person(&name, 30)).unwrap();
                }
            });
        }
    });

    assert_eq!(count_of(&engine, "Person"), 100);
    assert_eq!(count_of(&engine, "Adult"), 100);
    assert_eq!(engine.metrics().activations_fired, 100);
}

#[test]
fn readers_run_alongside_writers() {
    let engine = people();
    engine.add_rule(adult_rule()).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..50 {
                engine.assert_fact("Person", person("w", i)).unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..50 {
                // Every committed call is fully fired: adults never exceed people.
                let facts = engine.facts();
                let people = facts.iter().filter(|f| &*f.type_name == "Person").count();
                let adults = facts.iter().filter(|f| &*f.type_name == "Adult").count();
                assert!(adults <= people);
            }
        });
    });

    assert_eq!(count_of(&engine, "Person"), 50);
    assert_eq!(count_of(&engine, "Adult"), 32);
}

static HOLDER_ENTERED: AtomicBool = AtomicBool::new(false);
static READER_DONE: AtomicBool = AtomicBool::new(false);

/// Keeps the engine's write lock until the metrics reader is done, giving up
/// after five seconds.
fn hold_engine(_: &ActionContext<'_>) -> Result<Vec<ActionEffect>> {
    HOLDER_ENTERED.store(true, Ordering::SeqCst);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !READER_DONE.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            return Err(Error::evaluation("metrics reader blocked on the engine"));
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(Vec::new())
}

#[test]
fn metrics_are_readable_during_a_call() {
    let engine = people();
    engine.register_action("hold", hold_engine);
    engine
        .add_rule(
            Rule::new("hold")
                .with_pattern("p", "Person")
                .with_action(Action::custom("hold", [])),
        )
        .unwrap();

    thread::scope(|scope| {
        let writer = scope.spawn(|| engine.assert_fact("Person", person("ann", 30)));
        while !HOLDER_ENTERED.load(Ordering::SeqCst) {
            assert!(!writer.is_finished());
            thread::yield_now();
        }

        let snapshot = engine.metrics();
        READER_DONE.store(true, Ordering::SeqCst);

        assert!(snapshot.rules.contains_key("hold"));
        assert_eq!(snapshot.activations_fired, 1);
        assert!(writer.join().unwrap().is_ok());
    });
}
