//! Diagnostic reporting for the query language front end.

use crate::span::Span;

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// An error that prevents the query from being executed.
    Error,
    /// A warning that does not prevent execution.
    Warning,
}

/// A label attached to a diagnostic.
#[derive(Debug, Clone)]
pub struct Label {
    /// The span this label points to.
    pub span: Span,
    /// The label message.
    pub message: String,
}

impl Label {
    /// Creates a new label.
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// A diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: DiagnosticSeverity,
    /// Error code.
    pub code: String,
    /// Short title.
    pub title: String,
    /// Labels pointing to source locations.
    pub labels: Vec<Label>,
    /// Token names that would have been accepted at this point.
    pub expected: Vec<String>,
}

impl Diagnostic {
    /// Creates a new error diagnostic.
    pub fn error(code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code: code.into(),
            title: title.into(),
            labels: Vec::new(),
            expected: Vec::new(),
        }
    }

    /// Adds a primary label at a span.
    pub fn with_span(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::new(span, message));
        self
    }

    /// Records the token set that was expected at the error position.
    pub fn with_expected(mut self, expected: Vec<String>) -> Self {
        self.expected = expected;
        self
    }

    /// Returns the primary span, if any.
    pub fn primary_span(&self) -> Option<Span> {
        self.labels.first().map(|l| l.span)
    }
}

/// A collection of diagnostics.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    /// Creates a new empty diagnostic bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a diagnostic.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Adds an error diagnostic.
    pub fn error(
        &mut self,
        code: impl Into<String>,
        title: impl Into<String>,
        span: Span,
        message: impl Into<String>,
    ) {
        self.add(Diagnostic::error(code, title).with_span(span, message));
    }

    /// Returns true if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns an iterator over all diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Returns the first error diagnostic, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns true if there are no diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Returns the number of diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }
}

/// Common diagnostic codes.
pub mod codes {
    pub const UNEXPECTED_TOKEN: &str = "E0001";
    pub const UNEXPECTED_EOF: &str = "E0002";
    pub const INVALID_SYNTAX: &str = "E0003";
    pub const INVALID_LITERAL: &str = "E0004";
    pub const DUPLICATE_RESOURCE: &str = "E0010";
    pub const UNKNOWN_CHAIN_TARGET: &str = "E0011";
    pub const DEPENDENCY_CYCLE: &str = "E0012";
}
