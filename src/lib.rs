//! Trellis - Forward-chaining RETE production-rule engine
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: trellis_network    — Node network, sharing, engine, transactions, GC
//! Layer 2: trellis_condition  — Condition trees, normalization, evaluation
//! Layer 1: trellis_storage    — Fact store contract, type registry
//! Layer 0: trellis_foundation — Core types (Value, Fact, Error, BoundedCache)
//! ```

pub use trellis_condition as condition;
pub use trellis_foundation as foundation;
pub use trellis_network as network;
pub use trellis_storage as storage;

pub use trellis_condition::Condition;
pub use trellis_foundation::{Error, ErrorKind, Fact, FactId, FieldMap, Result, Type, TypeDefinition, Value};
pub use trellis_network::{Action, Engine, EngineConfig, Outcome, Rule};
