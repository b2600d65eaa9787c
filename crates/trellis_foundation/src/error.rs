//! Error types for the Trellis system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::fact::FactId;
use crate::types::Type;

/// Result alias used throughout Trellis.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Trellis operations.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates an unknown fact type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        })
    }

    /// Creates a fact not found error.
    #[must_use]
    pub fn fact_not_found(id: FactId) -> Self {
        Self::new(ErrorKind::FactNotFound(id))
    }

    /// Creates an evaluation error.
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invariant(message.into()))
    }
}

/// Broad classes of failure, each with its own recovery policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown type/field, type mismatch, or other ingestion problems.
    /// The failing call is rolled back.
    Schema,
    /// A runtime comparison or computation failed on one propagation path.
    Evaluation,
    /// API misuse such as a second `begin` while a transaction is active.
    State,
    /// A loop guard tripped. The failing call is rolled back.
    Limit,
    /// The network is corrupt and the engine instance is unusable.
    Invariant,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Evaluation => write!(f, "evaluation"),
            Self::State => write!(f, "state"),
            Self::Limit => write!(f, "limit"),
            Self::Invariant => write!(f, "invariant"),
        }
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Clone, Debug, Error)]
pub enum ErrorKind {
    /// Type mismatch during schema validation or evaluation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Fact type was never registered.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Field is not declared on the fact type.
    #[error("unknown field: {field} on type {type_name}")]
    UnknownField {
        /// The type that was queried.
        type_name: String,
        /// The field name that was not found.
        field: String,
    },

    /// A different definition already exists under this type name.
    #[error("conflicting definition for type: {0}")]
    DuplicateType(String),

    /// A fact with this id is already stored.
    #[error("duplicate fact: {0}")]
    DuplicateFact(FactId),

    /// Fact was not found in storage.
    #[error("fact not found: {0}")]
    FactNotFound(FactId),

    /// A rule with this name is already compiled.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// No rule with this name is compiled.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// Rule is structurally unusable (no patterns, repeated variable, ...).
    #[error("invalid rule {rule}: {message}")]
    InvalidRule {
        /// Rule name.
        rule: String,
        /// Description of the problem.
        message: String,
    },

    /// Custom action name has no registered handler.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Function name has no built-in implementation.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments to a function.
    #[error("arity mismatch for {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        /// Function name.
        name: String,
        /// Description of expected arity.
        expected: String,
        /// Actual number of arguments.
        actual: usize,
    },

    /// Condition evaluation failed at runtime.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// `begin` was called while a transaction is active.
    #[error("transaction {0} is already active")]
    TransactionActive(u64),

    /// `commit` or `rollback` was called with no active transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Network invariant violated; the engine instance is poisoned.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ErrorKind {
    /// Returns the taxonomy bucket for this kind.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TypeMismatch { .. }
            | Self::UnknownType(_)
            | Self::UnknownField { .. }
            | Self::DuplicateType(_)
            | Self::DuplicateFact(_)
            | Self::FactNotFound(_)
            | Self::DuplicateRule(_)
            | Self::UnknownRule(_)
            | Self::InvalidRule { .. }
            | Self::UnknownAction(_)
            | Self::UnknownFunction(_)
            | Self::ArityMismatch { .. } => ErrorCategory::Schema,
            Self::Evaluation(_) | Self::DivisionByZero => ErrorCategory::Evaluation,
            Self::TransactionActive(_) | Self::NoActiveTransaction => ErrorCategory::State,
            Self::LimitExceeded(_) => ErrorCategory::Limit,
            Self::Invariant(_) => ErrorCategory::Invariant,
        }
    }
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum rule activations per top-level call exceeded.
    MaxActivations {
        /// The configured limit.
        limit: usize,
        /// The rule that was about to fire.
        rule: Option<String>,
    },
    /// Maximum action chain depth exceeded.
    MaxChainDepth {
        /// The configured limit.
        limit: u32,
        /// The rule whose effect exceeded the limit.
        rule: Option<String>,
    },
    /// No fact id is left to allocate. `u64::MAX` is never a valid id.
    FactIdsExhausted,
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxActivations { limit, rule } => {
                write!(f, "max activations ({limit}) exceeded")?;
                if let Some(rule) = rule {
                    write!(f, " in rule {rule}")?;
                }
                Ok(())
            }
            Self::MaxChainDepth { limit, rule } => {
                write!(f, "max chain depth ({limit}) exceeded")?;
                if let Some(rule) = rule {
                    write!(f, " in rule {rule}")?;
                }
                Ok(())
            }
            Self::FactIdsExhausted => write!(f, "fact id space exhausted"),
        }
    }
}

/// Context about where an error occurred.
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    /// Rule or type name the error originated from.
    pub source: Option<String>,
    /// Fact being processed, if any.
    pub fact: Option<FactId>,
    /// Stack of rule/action frames.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source rule or type name.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the fact being processed.
    #[must_use]
    pub fn with_fact(mut self, fact: FactId) -> Self {
        self.fact = Some(fact);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "in {source}")?;
        }
        if let Some(fact) = self.fact {
            write!(f, " (fact {fact})")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
