use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};

/// A program file that failed to load, located by byte span.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Range<usize>,
    pub file_id: usize,
    pub notes: Vec<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        ParseError {
            message: message.into(),
            span,
            file_id,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Syntax and shape errors from the TOML layer. Errors without a position
    /// point at the start of the file.
    pub fn from_toml(err: &toml::de::Error, file_id: usize) -> Self {
        ParseError::new(err.message(), err.span().unwrap_or(0..0), file_id)
    }

    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        Diagnostic::error()
            .with_message(&self.message)
            .with_labels(vec![Label::primary(self.file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}

#[cfg(test)]
mod tests {
    use codespan_reporting::diagnostic::Severity;

    use super::*;

    #[test]
    fn diagnostic_carries_span_and_notes() {
        let error = ParseError::new("duplicate block id 'x'", 10..20, 3).with_note("first declared earlier");
        let diagnostic = error.to_diagnostic();
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.labels[0].file_id, 3);
        assert_eq!(diagnostic.labels[0].range, 10..20);
        assert_eq!(diagnostic.notes, ["first declared earlier"]);
    }

    #[test]
    fn toml_errors_keep_their_position() {
        let err = toml::from_str::<toml::Table>("a = ").unwrap_err();
        let error = ParseError::from_toml(&err, 0);
        assert_eq!(error.span, err.span().unwrap_or(0..0));
        assert_eq!(error.message, err.message());
    }
}
