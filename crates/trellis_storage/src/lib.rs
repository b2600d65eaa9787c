//! Fact storage contract, in-memory store, and type registry for Trellis.
//!
//! This crate provides:
//! - [`FactStore`] - The storage contract the engine depends on
//! - [`MemoryStore`] - Persistent-map backed in-memory store with O(1) snapshots
//! - [`TypeRegistry`] - Registered fact schemas used for semantic validation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod schema;
pub mod store;

pub use schema::TypeRegistry;
pub use store::{FactStore, MemoryStore};
