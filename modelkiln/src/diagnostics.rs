//! Compiler diagnostics.
//!
//! Diagnostics emitted during graph lowering and model compilation are
//! collected, not thrown: a [`DiagnosticLog`] accumulates them across every
//! stage of a request and the aggregate [`CompileResult`] is derived once at
//! completion. Hard failures that abort a request before the pipeline starts
//! are represented separately (see `compiler::RequestError`).

use std::fmt;

/// Severity of a single diagnostic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational, never affects the compile result.
    Info,
    /// The model still installs, but the result is downgraded to `Warnings`.
    Warning,
    /// Terminal for the request; the result becomes `Errors`.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single structured diagnostic: severity, message, optional context
/// references (node names, asset paths) pointing at the offending source.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub context: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic with no context references.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Creates a diagnostic pointing at a single context reference.
    pub fn with_context(
        severity: Severity,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            context: vec![context.into()],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if !self.context.is_empty() {
            write!(f, " [{}]", self.context.join(", "))?;
        }
        Ok(())
    }
}

/// Aggregate result of a compile request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompileResult {
    /// No result yet; the request has not completed.
    #[default]
    Unknown,
    /// Compiled cleanly.
    Success,
    /// Compiled with warnings; the model still installs.
    Warnings,
    /// Terminal errors; no model installs.
    Errors,
}

impl CompileResult {
    /// Returns true if a model produced under this result may be committed.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Success | Self::Warnings)
    }
}

impl fmt::Display for CompileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Success => write!(f, "Success"),
            Self::Warnings => write!(f, "Warnings"),
            Self::Errors => write!(f, "Errors"),
        }
    }
}

/// Collecting container for diagnostics emitted during a single request.
///
/// Cleared between requests. Counts are tracked incrementally so the
/// aggregate result is O(1) to derive.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    messages: Vec<Diagnostic>,
    warning_count: usize,
    error_count: usize,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic and updates the severity counters.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => self.warning_count += 1,
            Severity::Error => self.error_count += 1,
            Severity::Info => {}
        }
        self.messages.push(diagnostic);
    }

    /// Records a batch of diagnostics (e.g. everything a worker produced).
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.add(diagnostic);
        }
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    /// Consumes the log, yielding its messages for merging into another log.
    pub fn into_messages(self) -> Vec<Diagnostic> {
        self.messages
    }

    /// Derives the aggregate result from the recorded severities.
    pub fn result(&self) -> CompileResult {
        if self.error_count > 0 {
            CompileResult::Errors
        } else if self.warning_count > 0 {
            CompileResult::Warnings
        } else {
            CompileResult::Success
        }
    }

    /// Drops all messages and resets the counters.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.warning_count = 0;
        self.error_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log_is_success() {
        let log = DiagnosticLog::new();
        assert_eq!(log.result(), CompileResult::Success);
        assert_eq!(log.error_count(), 0);
        assert_eq!(log.warning_count(), 0);
    }

    #[test]
    fn test_warning_downgrades_result() {
        let mut log = DiagnosticLog::new();
        log.add(Diagnostic::warning("unnamed node"));
        assert_eq!(log.result(), CompileResult::Warnings);
        assert_eq!(log.warning_count(), 1);
    }

    #[test]
    fn test_error_wins_over_warning() {
        let mut log = DiagnosticLog::new();
        log.add(Diagnostic::warning("unnamed node"));
        log.add(Diagnostic::error("cycle detected"));
        assert_eq!(log.result(), CompileResult::Errors);
    }

    #[test]
    fn test_info_does_not_affect_result() {
        let mut log = DiagnosticLog::new();
        log.add(Diagnostic::new(Severity::Info, "lowering 12 nodes"));
        assert_eq!(log.result(), CompileResult::Success);
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut log = DiagnosticLog::new();
        log.add(Diagnostic::error("bad"));
        log.clear();
        assert_eq!(log.result(), CompileResult::Success);
        assert!(log.messages().is_empty());
    }

    #[test]
    fn test_display_includes_context() {
        let diagnostic =
            Diagnostic::with_context(Severity::Error, "cycle detected", "node:blend-3");
        let rendered = format!("{}", diagnostic);
        assert!(rendered.contains("error: cycle detected"));
        assert!(rendered.contains("node:blend-3"));
    }

    #[test]
    fn test_result_is_usable() {
        assert!(CompileResult::Success.is_usable());
        assert!(CompileResult::Warnings.is_usable());
        assert!(!CompileResult::Errors.is_usable());
        assert!(!CompileResult::Unknown.is_usable());
    }
}
