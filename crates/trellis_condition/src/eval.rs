//! Condition evaluation against bound facts.
//!
//! Evaluation errors (missing field, incompatible comparison, non-boolean
//! connective operand, division by zero) are reported to the caller, which
//! aborts only the propagation path that triggered them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, Result, Value};

use crate::ast::{ArithOp, CompareOp, Condition};
use crate::functions;

// =============================================================================
// Bindings
// =============================================================================

/// Variable-to-fact resolution used during evaluation.
pub trait Bindings {
    /// Returns the fact bound to `var`.
    fn lookup(&self, var: &str) -> Option<&Fact>;
}

impl<B: Bindings + ?Sized> Bindings for &B {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        (**self).lookup(var)
    }
}

impl Bindings for BTreeMap<Arc<str>, Fact> {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        self.get(var)
    }
}

impl Bindings for HashMap<Arc<str>, Fact> {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        self.get(var)
    }
}

/// Small binding sets (a token's facts) are scanned linearly.
impl Bindings for [(Arc<str>, Fact)] {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        self.iter().find(|(name, _)| &**name == var).map(|(_, fact)| fact)
    }
}

impl Bindings for Vec<(Arc<str>, Fact)> {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        self.as_slice().lookup(var)
    }
}

/// A single variable bound to a single fact, as seen by an alpha test.
#[derive(Clone, Copy, Debug)]
pub struct Single<'a> {
    /// Variable name.
    pub var: &'a str,
    /// Bound fact.
    pub fact: &'a Fact,
}

impl<'a> Single<'a> {
    /// Binds `var` to `fact`.
    #[must_use]
    pub const fn new(var: &'a str, fact: &'a Fact) -> Self {
        Self { var, fact }
    }
}

impl Bindings for Single<'_> {
    fn lookup(&self, var: &str) -> Option<&Fact> {
        (self.var == var).then_some(self.fact)
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Stateless condition evaluator.
pub struct Evaluator;

impl Evaluator {
    /// Evaluates a condition to a value.
    ///
    /// # Errors
    /// Returns an error if a variable is unbound, a field is missing, an
    /// operator is applied to incompatible values, or a function fails.
    pub fn evaluate<B: Bindings + ?Sized>(condition: &Condition, bindings: &B) -> Result<Value> {
        match condition {
            Condition::Literal(value) => Ok(value.clone()),
            Condition::Field { var, field } => {
                let fact = bound(bindings, var)?;
                fact.get(field).cloned().ok_or_else(|| {
                    Error::evaluation(format!("{}{} has no field {field}", fact.type_name, fact.id))
                })
            }
            Condition::Var(var) => Ok(Value::FactRef(bound(bindings, var)?.id)),
            Condition::Compare { op, left, right } => {
                let left = Self::evaluate(left, bindings)?;
                let right = Self::evaluate(right, bindings)?;
                compare(*op, &left, &right).map(Value::Bool)
            }
            Condition::Arith { op, left, right } => {
                let left = Self::evaluate(left, bindings)?;
                let right = Self::evaluate(right, bindings)?;
                arith(*op, &left, &right)
            }
            Condition::And(children) => {
                for child in children {
                    if !Self::test(child, bindings)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Condition::Or(children) => {
                for child in children {
                    if Self::test(child, bindings)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Condition::Not(inner) => Ok(Value::Bool(!Self::test(inner, bindings)?)),
            Condition::Call { name, args } => {
                let builtin = functions::lookup(name)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownFunction(name.to_string())))?;
                let args = args
                    .iter()
                    .map(|arg| Self::evaluate(arg, bindings))
                    .collect::<Result<Vec<_>>>()?;
                builtin.call(&args)
            }
        }
    }

    /// Evaluates a condition that must produce a boolean.
    ///
    /// # Errors
    /// Returns an error if evaluation fails or the result is not a boolean.
    pub fn test<B: Bindings + ?Sized>(condition: &Condition, bindings: &B) -> Result<bool> {
        let value = Self::evaluate(condition, bindings)?;
        value.as_bool().ok_or_else(|| {
            Error::evaluation(format!(
                "expected bool from {condition}, got {}",
                value.value_type()
            ))
        })
    }
}

fn bound<'b, B: Bindings + ?Sized>(bindings: &'b B, var: &str) -> Result<&'b Fact> {
    bindings
        .lookup(var)
        .ok_or_else(|| Error::evaluation(format!("unbound variable ?{var}")))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(left.loose_eq(right)),
        CompareOp::Ne => Ok(!left.loose_eq(right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ord = left.compare(right).ok_or_else(|| {
                Error::evaluation(format!(
                    "cannot compare {} {} {}",
                    left.value_type(),
                    op.symbol(),
                    right.value_type()
                ))
            })?;
            Ok(match op {
                CompareOp::Lt => ord.is_lt(),
                CompareOp::Le => ord.is_le(),
                CompareOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    }
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = left.as_number().unwrap_or_default();
            let b = right.as_number().unwrap_or_default();
            float_arith(op, a, b)
        }
        (Value::String(a), Value::String(b)) if op == ArithOp::Add => {
            Ok(Value::String(format!("{a}{b}").into()))
        }
        _ => Err(Error::evaluation(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left.value_type(),
            right.value_type()
        ))),
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Value> {
    if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0 {
        return Err(Error::new(ErrorKind::DivisionByZero));
    }
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => a.checked_div(b),
        ArithOp::Rem => a.checked_rem(b),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| Error::evaluation(format!("integer overflow in {a} {} {b}", op.symbol())))
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> Result<Value> {
    if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0.0 {
        return Err(Error::new(ErrorKind::DivisionByZero));
    }
    Ok(Value::Float(match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Rem => a % b,
    }))
}
