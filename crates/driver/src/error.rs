//! Error types for the provisioning driver

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{self, Diagnostic};

/// Result type alias using [`ProvisioningError`]
pub type ProvisioningResult<T> = std::result::Result<T, ProvisioningError>;

/// Lifecycle phase an operation (or a failure) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Apply,
    Output,
    Assert,
    Destroy,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Apply => "apply",
            Phase::Output => "output",
            Phase::Assert => "assert",
            Phase::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine reported when a command failed.
///
/// The captured stderr is kept verbatim so the original diagnostic text is
/// never lost, even when it does not follow the `Error:` block layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub exit_code: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
    pub stderr: String,
}

impl EngineFailure {
    /// Build a failure from an exit code and raw stderr, parsing diagnostics
    pub fn new(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self {
            exit_code,
            diagnostics: diagnostics::parse(&stderr),
            stderr,
        }
    }

    /// Error-level diagnostics only
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit status {code}")?,
            None => f.write_str("terminated by signal")?,
        }

        let mut errors = self.errors().peekable();
        if errors.peek().is_some() {
            for diag in errors {
                write!(f, "; Error: {}", diag.summary)?;
                if !diag.detail.is_empty() {
                    write!(f, " ({})", diag.detail)?;
                }
            }
            return Ok(());
        }

        let tail = self.stderr.trim();
        if !tail.is_empty() {
            write!(f, "; {tail}")?;
        }
        Ok(())
    }
}

/// Driver error types
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("init failed: {0}")]
    Init(EngineFailure),

    #[error("apply failed: {0}")]
    Apply(EngineFailure),

    #[error("output failed: {0}")]
    Output(EngineFailure),

    #[error("output \"{key}\" not found in state")]
    OutputNotFound { key: String },

    #[error("malformed {phase} output from engine: {reason}")]
    MalformedOutput { phase: Phase, reason: String },

    #[error("destroy failed: {0}")]
    Destroy(EngineFailure),

    #[error("{phase} timed out after {timeout:?}")]
    Timeout { phase: Phase, timeout: Duration },

    #[error("failed to run {binary} during {phase}: {source}")]
    Process {
        phase: Phase,
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisioningError {
    /// Wrap an engine failure in the variant matching `phase`
    pub fn engine(phase: Phase, failure: EngineFailure) -> Self {
        match phase {
            Phase::Init => ProvisioningError::Init(failure),
            Phase::Apply => ProvisioningError::Apply(failure),
            Phase::Output | Phase::Assert => ProvisioningError::Output(failure),
            Phase::Destroy => ProvisioningError::Destroy(failure),
        }
    }

    /// Phase this error surfaced in
    pub fn phase(&self) -> Phase {
        match self {
            ProvisioningError::InvalidTarget(_) | ProvisioningError::Init(_) => Phase::Init,
            ProvisioningError::Apply(_) => Phase::Apply,
            ProvisioningError::Output(_) | ProvisioningError::OutputNotFound { .. } => {
                Phase::Output
            }
            ProvisioningError::Destroy(_) => Phase::Destroy,
            ProvisioningError::MalformedOutput { phase, .. }
            | ProvisioningError::Timeout { phase, .. }
            | ProvisioningError::Process { phase, .. } => *phase,
        }
    }

    /// The engine's own report, if the engine ran and failed
    pub fn engine_failure(&self) -> Option<&EngineFailure> {
        match self {
            ProvisioningError::Init(f)
            | ProvisioningError::Apply(f)
            | ProvisioningError::Output(f)
            | ProvisioningError::Destroy(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_failure_display_prefers_diagnostics() {
        let failure = EngineFailure::new(
            Some(1),
            "╷\n│ Error: Invalid provider configuration\n│ \n│ Missing region.\n╵\n",
        );
        let err = ProvisioningError::engine(Phase::Apply, failure);
        assert_eq!(
            err.to_string(),
            "apply failed: exit status 1; Error: Invalid provider configuration (Missing region.)"
        );
        assert_eq!(err.phase(), Phase::Apply);
    }

    #[test]
    fn test_engine_failure_display_falls_back_to_stderr() {
        let failure = EngineFailure::new(Some(127), "terraform: command crashed\n");
        let err = ProvisioningError::engine(Phase::Destroy, failure);
        assert_eq!(
            err.to_string(),
            "destroy failed: exit status 127; terraform: command crashed"
        );
    }

    #[test]
    fn test_output_not_found_is_output_phase() {
        let err = ProvisioningError::OutputNotFound {
            key: "pipeline_name".to_string(),
        };
        assert_eq!(err.phase(), Phase::Output);
        assert!(err.engine_failure().is_none());
        assert_eq!(err.to_string(), "output \"pipeline_name\" not found in state");
    }

    #[test]
    fn test_timeout_message_names_phase() {
        let err = ProvisioningError::Timeout {
            phase: Phase::Apply,
            timeout: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "apply timed out after 90s");
    }
}
