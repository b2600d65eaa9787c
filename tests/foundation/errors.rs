//! Integration tests for Error types
//!
//! Tests error construction, display, context, and categories.

use trellis_foundation::{
    Error, ErrorCategory, ErrorContext, ErrorKind, FactId, SemanticLimit, Type,
};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_type_mismatch() {
    let err = Error::type_mismatch(Type::Int, Type::String);
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    let msg = format!("{err}");
    assert!(msg.contains("int"));
    assert!(msg.contains("string"));
}

#[test]
fn error_fact_not_found() {
    let err = Error::fact_not_found(FactId::new(42));
    assert!(matches!(err.kind, ErrorKind::FactNotFound(_)));
    assert!(format!("{err}").contains("42"));
}

#[test]
fn error_unknown_field() {
    let err = Error::unknown_field("Person", "height");
    let msg = format!("{err}");
    assert!(msg.contains("Person"));
    assert!(msg.contains("height"));
}

#[test]
fn error_limit_display() {
    let err = Error::limit_exceeded(SemanticLimit::MaxChainDepth {
        limit: 8,
        rule: Some("ping".to_string()),
    });
    let msg = format!("{err}");
    assert!(msg.contains('8'));
    assert!(msg.contains("ping"));
}

// =============================================================================
// Categories
// =============================================================================

#[test]
fn categories() {
    assert_eq!(
        Error::unknown_type("Ghost").category(),
        ErrorCategory::Schema
    );
    assert_eq!(
        Error::new(ErrorKind::DivisionByZero).category(),
        ErrorCategory::Evaluation
    );
    assert_eq!(
        Error::new(ErrorKind::TransactionActive(1)).category(),
        ErrorCategory::State
    );
    assert_eq!(
        Error::new(ErrorKind::NoActiveTransaction).category(),
        ErrorCategory::State
    );
    assert_eq!(Error::invariant("broken").category(), ErrorCategory::Invariant);
    assert_eq!(
        Error::new(ErrorKind::UnknownRule("r".into())).category(),
        ErrorCategory::Schema
    );
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn context_is_attached() {
    let err = Error::evaluation("bad").with_context(
        ErrorContext::new()
            .with_source("adult")
            .with_fact(FactId::new(3))
            .with_frame("insert"),
    );
    let context = err.context.unwrap();
    assert_eq!(context.source.as_deref(), Some("adult"));
    assert_eq!(context.fact, Some(FactId::new(3)));
    assert_eq!(context.stack, ["insert"]);
    let rendered = context.to_string();
    assert!(rendered.contains("in adult"));
    assert!(rendered.contains("#3"));
}
