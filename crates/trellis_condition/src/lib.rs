//! Condition trees, canonical normalization, and evaluation for Trellis.
//!
//! This crate provides:
//! - [`Condition`] - The boolean/arithmetic expression tree attached to rules
//! - [`Normalizer`] - Canonical rewriting with a memoizing bounded cache
//! - [`ConditionKey`] - Canonical string plus structural hash used for sharing
//! - [`Evaluator`] - Evaluation of conditions against bound facts
//! - [`functions`] - Built-in functions callable from conditions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod eval;
pub mod functions;
pub mod normalize;

pub use ast::{ArithOp, CompareOp, Condition, JoinEquality};
pub use eval::{Bindings, Evaluator, Single};
pub use functions::{BUILTINS, Builtin, validate_calls};
pub use normalize::{ConditionKey, NormalizedCondition, Normalizer};
