//! Core values, facts, errors, and bounded caches for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The runtime value carried by fact fields
//! - [`Fact`] and [`FactId`] - Typed facts with stable identities
//! - [`TypeDefinition`] - Declared fact schemas
//! - [`Type`] - Type descriptors for schema validation
//! - [`Error`] - Rich error types with context
//! - [`BoundedCache`] - LRU cache with optional TTL and lock-free statistics

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
pub mod fact;
pub mod types;
pub mod value;

pub use cache::{BoundedCache, CacheConfig, CacheCounters, CacheStats};
pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind, Result, SemanticLimit};
pub use fact::{Fact, FactId, FieldDef, FieldMap, TypeDefinition};
pub use types::Type;
pub use value::Value;
