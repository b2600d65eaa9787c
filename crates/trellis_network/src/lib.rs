//! RETE network, compilation, and the engine facade for Trellis.
//!
//! This crate provides:
//! - [`Engine`] - Facts, rules, transactions, and firing behind one lock
//! - [`Builder`] - Rule compilation with structural node sharing
//! - [`Network`] - The node arena and its working memories
//! - [`SharingRegistry`] - Bounded index of shareable nodes
//! - [`gc`] - Reclamation of nodes detached by reset
//! - [`Transaction`] - Command log with exact inverses

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
pub mod builder;
pub mod config;
pub mod engine;
pub mod gc;
pub mod memory;
pub mod metrics;
pub mod network;
pub mod node;
pub mod registry;
pub mod rule;
pub mod trace;
pub mod transaction;

pub use agenda::{Activation, Agenda};
pub use builder::{BuildStats, Builder, Compiled, validate_rule};
pub use config::EngineConfig;
pub use engine::{Engine, Outcome};
pub use gc::Collection;
pub use memory::{FactIndex, Memory, Token};
pub use metrics::{Metrics, MetricsSnapshot, Phase};
pub use network::{NewActivation, Network, Propagation, TokenBindings};
pub use node::{Arena, JoinKey, JoinSpec, Node, NodeId, NodeKind};
pub use registry::{ShareKey, SharingRegistry};
pub use rule::{
    Action, ActionContext, ActionEffect, ActionHandler, ActionRegistry, FieldExprs, Pattern, Rule,
    render_message,
};
pub use trace::{TraceBuffer, TraceEvent, TraceRecord};
pub use transaction::{Command, Transaction};
