//! Built-in functions callable from conditions and action expressions.

use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Result, Type, Value};

use crate::ast::Condition;

/// Signature of a native function.
pub type NativeFn = fn(&[Value]) -> Result<Value>;

/// A built-in function and its accepted arity.
#[derive(Clone, Copy, Debug)]
pub struct Builtin {
    /// Name used in `(call name ...)`.
    pub name: &'static str,
    /// Minimum argument count.
    pub min_args: usize,
    /// Maximum argument count, `None` for variadic.
    pub max_args: Option<usize>,
    /// Implementation.
    pub func: NativeFn,
}

impl Builtin {
    /// Checks an argument count against this function's arity.
    ///
    /// # Errors
    /// Returns `ArityMismatch`.
    pub fn check_arity(&self, actual: usize) -> Result<()> {
        let within = actual >= self.min_args && self.max_args.is_none_or(|max| actual <= max);
        if within {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..={max}", self.min_args),
            None => format!("at least {}", self.min_args),
        };
        Err(Error::new(ErrorKind::ArityMismatch {
            name: self.name.to_string(),
            expected,
            actual,
        }))
    }

    /// Calls the function after checking arity.
    ///
    /// # Errors
    /// Returns `ArityMismatch` or whatever the function itself reports.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.check_arity(args.len())?;
        (self.func)(args)
    }
}

/// Every built-in function.
pub const BUILTINS: &[Builtin] = &[
    Builtin { name: "abs", min_args: 1, max_args: Some(1), func: native_abs },
    Builtin { name: "len", min_args: 1, max_args: Some(1), func: native_len },
    Builtin { name: "lower", min_args: 1, max_args: Some(1), func: native_lower },
    Builtin { name: "upper", min_args: 1, max_args: Some(1), func: native_upper },
    Builtin { name: "min", min_args: 1, max_args: None, func: native_min },
    Builtin { name: "max", min_args: 1, max_args: None, func: native_max },
    Builtin { name: "contains", min_args: 2, max_args: Some(2), func: native_contains },
    Builtin { name: "starts_with", min_args: 2, max_args: Some(2), func: native_starts_with },
];

/// Looks up a built-in by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Checks that every call in `condition` names a known function with a valid
/// argument count.
///
/// # Errors
/// Returns `UnknownFunction` or `ArityMismatch` for the first bad call.
pub fn validate_calls(condition: &Condition) -> Result<()> {
    for (name, argc) in condition.calls() {
        let builtin =
            lookup(&name).ok_or_else(|| Error::new(ErrorKind::UnknownFunction(name.to_string())))?;
        builtin.check_arity(argc)?;
    }
    Ok(())
}

fn mismatch(expected: Type, actual: Option<&Value>) -> Error {
    Error::type_mismatch(expected, actual.map_or(Type::Nil, Value::value_type))
}

fn string_arg(args: &[Value], index: usize) -> Result<&str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| mismatch(Type::String, args.get(index)))
}

fn native_abs(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Int(n)) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::evaluation("integer overflow in abs")),
        Some(Value::Float(n)) => Ok(Value::Float(n.abs())),
        other => Err(mismatch(Type::Float, other)),
    }
}

fn native_len(args: &[Value]) -> Result<Value> {
    let s = string_arg(args, 0)?;
    i64::try_from(s.chars().count())
        .map(Value::Int)
        .map_err(|_| Error::evaluation("string too long"))
}

fn native_lower(args: &[Value]) -> Result<Value> {
    Ok(Value::String(Arc::from(string_arg(args, 0)?.to_lowercase())))
}

fn native_upper(args: &[Value]) -> Result<Value> {
    Ok(Value::String(Arc::from(string_arg(args, 0)?.to_uppercase())))
}

fn extremum(args: &[Value], keep_new: fn(std::cmp::Ordering) -> bool) -> Result<Value> {
    let mut best = args.first().cloned().ok_or_else(|| mismatch(Type::Float, None))?;
    for arg in &args[1..] {
        let ord = arg.compare(&best).ok_or_else(|| {
            Error::evaluation(format!(
                "cannot compare {} with {}",
                arg.value_type(),
                best.value_type()
            ))
        })?;
        if keep_new(ord) {
            best = arg.clone();
        }
    }
    Ok(best)
}

fn native_min(args: &[Value]) -> Result<Value> {
    extremum(args, std::cmp::Ordering::is_lt)
}

fn native_max(args: &[Value]) -> Result<Value> {
    extremum(args, std::cmp::Ordering::is_gt)
}

fn native_contains(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(string_arg(args, 0)?.contains(string_arg(args, 1)?)))
}

fn native_starts_with(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(string_arg(args, 0)?.starts_with(string_arg(args, 1)?)))
}
