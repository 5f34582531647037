//! Error types for the lifecycle harness

use infracheck_driver::{Phase, ProvisioningError};
use thiserror::Error;

use crate::state::RunState;

/// A provisioned output did not have the expected shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("output \"{key}\" expected to be {expected}, got {actual:?}")]
pub struct AssertionFailure {
    pub key: String,
    pub expected: String,
    pub actual: String,
}

/// Why a lifecycle run failed
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("assertion failed: {0}")]
    Assertion(#[from] AssertionFailure),

    #[error("cannot run {phase} while the run is {state}")]
    OutOfOrder { phase: Phase, state: RunState },

    #[error("run ended while {state}, before its output was validated")]
    Incomplete { state: RunState },
}

impl LifecycleError {
    /// Phase the failure is attributed to
    pub fn phase(&self) -> Phase {
        match self {
            LifecycleError::Provisioning(e) => e.phase(),
            LifecycleError::Assertion(_) | LifecycleError::Incomplete { .. } => Phase::Assert,
            LifecycleError::OutOfOrder { phase, .. } => *phase,
        }
    }
}

/// Errors outside a run: loading scenarios, writing reports
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("invalid scenario {name}: {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
