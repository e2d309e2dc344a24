use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// Fatal access-control errors. Individual rule violations are not errors
/// in this sense; they are accumulated as [`Diagnostic`] values so that an
/// operator sees every problem in a single pass.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum AccessError {
    #[error("access control configuration has {errors} error(s)")]
    #[diagnostic(
        code(lodestar::access::invalid_configuration),
        help("All problems are logged above; fix them and restart. The gateway refuses to serve traffic with an invalid rule set.")
    )]
    InvalidConfiguration { errors: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The configuration is unusable; the process must not serve traffic.
    Error,
    /// Notable but non-fatal.
    Warning,
}

/// One validation finding, tagged with the 1-based authored position of the
/// rule it concerns (if any). Returned as data, never thrown.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub rule: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(rule: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            rule,
            message: message.into(),
        }
    }

    pub fn warning(rule: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            rule,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// True if any diagnostic in the list is error-level.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Number of error-level diagnostics in the list.
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}
