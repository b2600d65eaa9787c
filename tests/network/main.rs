//! Integration tests for Layer 3: Network
//!
//! Tests for structural sharing, propagation, joins, and collection.

mod collection;
mod joins;
mod sharing;
