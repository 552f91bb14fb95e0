//! Diagnostics produced while compiling rule text.
//!
//! A [`SourceDiagnostic`] is the data a repair prompt needs: where the failure
//! is, what was expected, and a message. It renders in the fixed
//! `"<line>:<column> <message>"` shape. [`CompileError`] wraps it with the
//! akh miette pattern for display to humans.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use super::ast::{Layer, Position};

/// Reason code distinguishing the kinds of rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// Malformed text.
    Syntax,
    /// An atom names a predicate with no declaration.
    UndeclaredPredicate,
    /// An atom's argument count differs from its declaration.
    ArityMismatch,
    /// A constant or variable contradicts a declared argument type.
    TypeMismatch,
    /// A head or comparison variable is not bound by a positive body atom.
    UnboundVariable,
    /// A learned clause defines a read-only schema predicate.
    ReadOnlyPredicate,
    /// A predicate is declared twice.
    DuplicateDeclaration,
    /// A declaration appears where only clauses are accepted.
    DeclarationNotAllowed,
    /// A hot-load candidate does not hold exactly one clause.
    CandidateShape,
    /// An exclusive predicate depends on itself through its rules.
    RecursiveExclusive,
}

impl DiagnosticCode {
    /// Whether this code is a parse failure rather than a semantic rejection.
    pub fn is_syntax(self) -> bool {
        matches!(self, Self::Syntax)
    }
}

/// Location, expectation, and message of a single compile failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDiagnostic {
    pub layer: Layer,
    pub line: usize,
    pub column: usize,
    /// The token or construct the compiler expected, when known.
    pub expected: Option<String>,
    pub message: String,
    pub code: DiagnosticCode,
}

impl SourceDiagnostic {
    pub(crate) fn syntax(
        layer: Layer,
        position: Position,
        expected: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            line: position.line,
            column: position.column,
            expected: Some(expected.into()),
            message: message.into(),
            code: DiagnosticCode::Syntax,
        }
    }

    pub(crate) fn semantic(
        layer: Layer,
        position: Position,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            line: position.line,
            column: position.column,
            expected: None,
            message: message.into(),
            code,
        }
    }

    pub(crate) fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

impl fmt::Display for SourceDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.line, self.column, self.message)
    }
}

/// Errors from the program compiler.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("parse error in {layer} layer at {diagnostic}")]
    #[diagnostic(
        code(akh::kernel::parse),
        help(
            "The rule text is malformed. Every statement ends with '.', atoms \
             take a parenthesized argument list, and rules use ':-' between \
             head and body."
        )
    )]
    Parse {
        layer: Layer,
        diagnostic: SourceDiagnostic,
    },

    #[error("rejected {layer} layer at {diagnostic}")]
    #[diagnostic(
        code(akh::kernel::semantic),
        help(
            "The rule text is well-formed but breaks a program invariant: \
             declare every predicate in the schema, match declared arity and \
             types, bind every head variable in a body atom, and never define \
             schema predicates from learned rules."
        )
    )]
    Semantic {
        layer: Layer,
        diagnostic: SourceDiagnostic,
    },
}

impl CompileError {
    /// The diagnostic describing this failure.
    pub fn diagnostic(&self) -> &SourceDiagnostic {
        match self {
            Self::Parse { diagnostic, .. } | Self::Semantic { diagnostic, .. } => diagnostic,
        }
    }

    /// Consume the error, keeping only its diagnostic.
    pub fn into_diagnostic(self) -> SourceDiagnostic {
        match self {
            Self::Parse { diagnostic, .. } | Self::Semantic { diagnostic, .. } => diagnostic,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

impl From<SourceDiagnostic> for CompileError {
    fn from(diagnostic: SourceDiagnostic) -> Self {
        let layer = diagnostic.layer;
        if diagnostic.code.is_syntax() {
            Self::Parse { layer, diagnostic }
        } else {
            Self::Semantic { layer, diagnostic }
        }
    }
}

/// Result type for compiler operations.
pub type CompileResult<T> = std::result::Result<T, CompileError>;
