// diag.rs — Diagnostics model shared by every phase
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span in module source text.
pub type Span = SimpleSpan;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // unrecognized character
    pub const E0010: DiagCode = DiagCode("E0010"); // syntax error
    pub const E0100: DiagCode = DiagCode("E0100"); // duplicate name
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown operand reference
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown operation
    pub const E0103: DiagCode = DiagCode("E0103"); // select of a non-tuple value
    pub const E0104: DiagCode = DiagCode("E0104"); // select index out of range
    pub const E0105: DiagCode = DiagCode("E0105"); // wrong operand count
    pub const E0106: DiagCode = DiagCode("E0106"); // missing or misplaced attribute
    pub const E0107: DiagCode = DiagCode("E0107"); // empty computation
    pub const E0108: DiagCode = DiagCode("E0108"); // multiple root markers
    pub const W0001: DiagCode = DiagCode("W0001"); // custom op with no layout pairs
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "no layout pairs")
            .with_code(codes::W0001);
        assert_eq!(format!("{d}"), "warning[W0001]: no layout pairs");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(dummy_span(), "duplicate name")
            .with_code(codes::E0100)
            .with_hint("rename one of the instructions")
            .with_related(dummy_span(), "first defined here");

        assert_eq!(d.code, Some(codes::E0100));
        assert_eq!(d.hint.as_deref(), Some("rename one of the instructions"));
        assert_eq!(d.related_spans.len(), 1);
    }
}
