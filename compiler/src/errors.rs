//! Rich error reporting with source spans.
//!
//! Every stage reports problems as [`Diagnostic`] values: a stable
//! [`ErrorKind`], a message and the span of the offending source text.
//! Stages do not hold the source themselves; the pipeline driver bundles
//! the accumulated diagnostics with the source into a [`CompileFailure`],
//! which miette renders with underlines for every entry.

use std::fmt;

use miette::{Diagnostic as MietteDiagnostic, LabeledSpan, NamedSource, SourceSpan};
use thiserror::Error;

use crate::token::Span;

/// The closed taxonomy of compile-time errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unexpected character or token. Fatal for the unit.
    Syntax,
    /// Wrong argument shape for an operation, or a `JUMP_IF` target that
    /// names no gate.
    Arity,
    /// Identifier read before any statement defines it.
    UndefinedIdentifier,
    /// `DIV` with a literal zero divisor.
    DivideByZero,
    /// Two gates share a name.
    DuplicateGate,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::UndefinedIdentifier => "UndefinedIdentifierError",
            ErrorKind::DivideByZero => "DivideByZeroError",
            ErrorKind::DuplicateGate => "DuplicateGateError",
        }
    }

    fn code(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "cel::syntax",
            ErrorKind::Arity => "cel::arity",
            ErrorKind::UndefinedIdentifier => "cel::undefined_identifier",
            ErrorKind::DivideByZero => "cel::divide_by_zero",
            ErrorKind::DuplicateGate => "cel::duplicate_gate",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single compile-time error with its source location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub label: String,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        label: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            label: label.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Syntax, message, span, "here")
    }

    pub fn arity(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Arity, message, span, "wrong arguments")
    }

    pub fn undefined(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::UndefinedIdentifier,
            format!("identifier '{}' is used before it is defined", name),
            span,
            "not defined yet",
        )
        .with_help(format!("assign it first, e.g. `{}: SET 0;`", name))
    }

    pub fn unknown_gate(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::Arity,
            format!(
                "JUMP_IF expects a flag label and an existing gate name, but no gate is named '{}'",
                name
            ),
            span,
            "no gate with this name",
        )
    }

    pub fn divide_by_zero(span: Span) -> Self {
        Self::new(
            ErrorKind::DivideByZero,
            "division by literal zero",
            span,
            "divisor is 0",
        )
    }

    pub fn duplicate_gate(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::DuplicateGate,
            format!("gate '{}' is declared more than once", name),
            span,
            "duplicate gate",
        )
    }

    /// `file:line:col: Kind: message`, for plain (non-graphical) output.
    pub fn render_plain(&self, file: &str, source: &str) -> String {
        let (line, col) = self.span.line_col(source);
        format!("{}:{}:{}: {}", file, line, col, self)
    }
}

impl MietteDiagnostic for Diagnostic {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let span = SourceSpan::new(self.span.start.into(), self.span.len().max(1));
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some(self.label.clone()),
            span,
        ))))
    }
}

/// All diagnostics of a failed compilation, bundled with the source text.
#[derive(Error, Debug, MietteDiagnostic)]
#[error("compilation failed with {} error(s)", .diagnostics.len())]
#[diagnostic(code(cel::compile_failed))]
pub struct CompileFailure {
    #[source_code]
    pub src: NamedSource<String>,
    #[related]
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileFailure {
    pub fn new(name: impl AsRef<str>, source: &str, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            src: NamedSource::new(name, source.to_string()),
            diagnostics,
        }
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    pub fn has(&self, kind: ErrorKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}
