//! Condition expression trees.
//!
//! A condition is what the parser hands over for a rule's `when` clause:
//! comparisons, connectives, field accesses, literals, arithmetic, and
//! function calls over the rule's pattern variables.
//!
//! Every condition renders to an s-expression (see [`fmt::Display`]); the
//! rendering of a normalized tree is its canonical string.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use trellis_foundation::{FactId, Value};

// =============================================================================
// Operators
// =============================================================================

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Returns true if operand order does not matter.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+` (also string concatenation)
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
}

impl ArithOp {
    /// Returns true if operand order does not matter.
    ///
    /// `Add` also concatenates strings, so only `Mul` qualifies.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Mul)
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

// =============================================================================
// Condition
// =============================================================================

/// A condition expression tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    /// A constant.
    Literal(Value),
    /// A field of the fact bound to `var`: `p.age`.
    Field {
        /// Pattern variable.
        var: Arc<str>,
        /// Field name.
        field: Arc<str>,
    },
    /// The fact bound to a variable, as a fact reference.
    Var(Arc<str>),
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Condition>,
        /// Right operand.
        right: Box<Condition>,
    },
    /// Binary arithmetic.
    Arith {
        /// Operator.
        op: ArithOp,
        /// Left operand.
        left: Box<Condition>,
        /// Right operand.
        right: Box<Condition>,
    },
    /// Conjunction.
    And(Vec<Condition>),
    /// Disjunction.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// Built-in function call.
    Call {
        /// Function name.
        name: Arc<str>,
        /// Arguments, in call order.
        args: Vec<Condition>,
    },
}

/// A cross-variable field equality `a.f == b.g`, the shape a join can index on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinEquality {
    /// One side's variable.
    pub left_var: Arc<str>,
    /// One side's field.
    pub left_field: Arc<str>,
    /// Other side's variable.
    pub right_var: Arc<str>,
    /// Other side's field.
    pub right_field: Arc<str>,
}

impl Condition {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// A literal value.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A field access `var.field`.
    #[must_use]
    pub fn field(var: impl Into<Arc<str>>, field: impl Into<Arc<str>>) -> Self {
        Self::Field {
            var: var.into(),
            field: field.into(),
        }
    }

    /// A reference to the fact bound to `var`.
    #[must_use]
    pub fn var(var: impl Into<Arc<str>>) -> Self {
        Self::Var(var.into())
    }

    /// Conjunction of the given conditions.
    #[must_use]
    pub fn and(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::And(children.into_iter().collect())
    }

    /// Disjunction of the given conditions.
    #[must_use]
    pub fn or(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    /// Negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Condition) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Function call.
    #[must_use]
    pub fn call(name: impl Into<Arc<str>>, args: impl IntoIterator<Item = Condition>) -> Self {
        Self::Call {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Comparison of `self` against `other`.
    #[must_use]
    pub fn compare(self, op: CompareOp, other: impl Into<Condition>) -> Self {
        Self::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    /// Arithmetic on `self` and `other`.
    #[must_use]
    pub fn arith(self, op: ArithOp, other: impl Into<Condition>) -> Self {
        Self::Arith {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    /// `self == other`
    #[must_use]
    pub fn equals(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Eq, other)
    }

    /// `self != other`
    #[must_use]
    pub fn not_equals(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Ne, other)
    }

    /// `self < other`
    #[must_use]
    pub fn less_than(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Lt, other)
    }

    /// `self <= other`
    #[must_use]
    pub fn at_most(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Le, other)
    }

    /// `self > other`
    #[must_use]
    pub fn greater_than(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Gt, other)
    }

    /// `self >= other`
    #[must_use]
    pub fn at_least(self, other: impl Into<Condition>) -> Self {
        self.compare(CompareOp::Ge, other)
    }

    // -------------------------------------------------------------------------
    // Analysis
    // -------------------------------------------------------------------------

    /// Returns every pattern variable the condition mentions.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Arc<str>> {
        let mut vars = BTreeSet::new();
        self.visit(&mut |node| match node {
            Self::Field { var, .. } | Self::Var(var) => {
                vars.insert(var.clone());
            }
            _ => {}
        });
        vars
    }

    /// Returns every `(variable, field)` access.
    #[must_use]
    pub fn field_accesses(&self) -> Vec<(Arc<str>, Arc<str>)> {
        let mut fields = Vec::new();
        self.visit(&mut |node| {
            if let Self::Field { var, field } = node {
                fields.push((var.clone(), field.clone()));
            }
        });
        fields
    }

    /// Returns every function call as `(name, argument count)`.
    #[must_use]
    pub fn calls(&self) -> Vec<(Arc<str>, usize)> {
        let mut calls = Vec::new();
        self.visit(&mut |node| {
            if let Self::Call { name, args } = node {
                calls.push((name.clone(), args.len()));
            }
        });
        calls
    }

    /// Splits a top-level conjunction into its parts.
    ///
    /// A literal `true` contributes nothing.
    #[must_use]
    pub fn into_conjuncts(self) -> Vec<Condition> {
        match self {
            Self::And(children) => children
                .into_iter()
                .flat_map(Condition::into_conjuncts)
                .collect(),
            Self::Literal(Value::Bool(true)) => Vec::new(),
            other => vec![other],
        }
    }

    /// Recognizes `a.f == b.g` with `a != b`.
    #[must_use]
    pub fn as_join_equality(&self) -> Option<JoinEquality> {
        let Self::Compare {
            op: CompareOp::Eq,
            left,
            right,
        } = self
        else {
            return None;
        };
        match (left.as_ref(), right.as_ref()) {
            (
                Self::Field {
                    var: left_var,
                    field: left_field,
                },
                Self::Field {
                    var: right_var,
                    field: right_field,
                },
            ) if left_var != right_var => Some(JoinEquality {
                left_var: left_var.clone(),
                left_field: left_field.clone(),
                right_var: right_var.clone(),
                right_field: right_field.clone(),
            }),
            _ => None,
        }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// Pre-order traversal.
    pub fn visit<F: FnMut(&Condition)>(&self, f: &mut F) {
        f(self);
        match self {
            Self::Literal(_) | Self::Field { .. } | Self::Var(_) => {}
            Self::Compare { left, right, .. } | Self::Arith { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Self::And(children) | Self::Or(children) | Self::Call { args: children, .. } => {
                for child in children {
                    child.visit(f);
                }
            }
            Self::Not(inner) => inner.visit(f),
        }
    }

    /// Appends the s-expression rendering of this tree to `out`.
    pub fn render(&self, out: &mut String) {
        match self {
            Self::Literal(value) => render_literal(value, out),
            Self::Field { var, field } => {
                render_name(var, out);
                out.push('.');
                render_name(field, out);
            }
            Self::Var(var) => {
                out.push('?');
                render_name(var, out);
            }
            Self::Compare { op, left, right } => {
                render_node(op.symbol(), [left.as_ref(), right.as_ref()], out);
            }
            Self::Arith { op, left, right } => {
                render_node(op.symbol(), [left.as_ref(), right.as_ref()], out);
            }
            Self::And(children) => render_node("and", children, out),
            Self::Or(children) => render_node("or", children, out),
            Self::Not(inner) => render_node("not", [inner.as_ref()], out),
            Self::Call { name, args } => {
                out.push_str("(call ");
                render_name(name, out);
                for arg in args {
                    out.push(' ');
                    arg.render(out);
                }
                out.push(')');
            }
        }
    }

    /// Returns the s-expression rendering as a new string.
    #[must_use]
    pub fn rendered(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        out
    }
}

fn render_node<'a>(
    head: &str,
    children: impl IntoIterator<Item = &'a Condition>,
    out: &mut String,
) {
    out.push('(');
    out.push_str(head);
    for child in children {
        out.push(' ');
        child.render(out);
    }
    out.push(')');
}

/// Names made of anything but letters, digits, and `_` are quoted, so
/// `"a.b".c` and `a."b.c"` stay distinct.
fn render_name(name: &str, out: &mut String) {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        out.push_str(name);
    } else {
        out.push_str(&format!("{name:?}"));
    }
}

/// Literals render unambiguously: strings quoted and escaped, floats always
/// carry a decimal point or exponent, fact references use `#id`.
fn render_literal(value: &Value, out: &mut String) {
    // Writing into a String cannot fail
    let _ = match value {
        Value::Nil => write!(out, "nil"),
        Value::Bool(b) => write!(out, "{b}"),
        Value::Int(n) => write!(out, "{n}"),
        Value::Float(n) => write!(out, "{n:?}"),
        Value::String(s) => write!(out, "{:?}", &**s),
        Value::FactRef(id) => write!(out, "{id}"),
    };
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered())
    }
}

// Convenience From implementations

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<bool> for Condition {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

impl From<i64> for Condition {
    fn from(n: i64) -> Self {
        Self::Literal(Value::Int(n))
    }
}

impl From<i32> for Condition {
    fn from(n: i32) -> Self {
        Self::Literal(Value::from(n))
    }
}

impl From<f64> for Condition {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Float(n))
    }
}

impl From<&str> for Condition {
    fn from(s: &str) -> Self {
        Self::Literal(Value::from(s))
    }
}

impl From<FactId> for Condition {
    fn from(id: FactId) -> Self {
        Self::Literal(Value::FactRef(id))
    }
}
