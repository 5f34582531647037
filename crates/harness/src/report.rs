//! Run and suite reports

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use infracheck_driver::Phase;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{HarnessResult, LifecycleError};
use crate::expect::OutputBinding;
use crate::state::RunState;

/// File name the suite report is written under
pub const RESULTS_FILE: &str = "lifecycle-results.json";

/// A failure attributed to one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub phase: Phase,
    pub message: String,
}

impl From<&LifecycleError> for FailureReport {
    fn from(err: &LifecycleError) -> Self {
        Self {
            phase: err.phase(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)
    }
}

/// Wall time spent in each phase, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub init_ms: Option<u64>,
    pub apply_ms: Option<u64>,
    pub output_ms: Option<u64>,
    pub destroy_ms: Option<u64>,
    pub total_ms: u64,
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of one lifecycle run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub name: String,
    pub target: PathBuf,
    pub state: RunState,
    pub output: Option<OutputBinding>,
    /// First failure of the run (init, apply, output or assert)
    pub failure: Option<FailureReport>,
    /// Destroy failure, reported next to `failure`, never in its place
    pub teardown_failure: Option<FailureReport>,
    pub torn_down: bool,
    pub started_at: DateTime<Utc>,
    pub timings: PhaseTimings,
}

impl RunReport {
    /// Report for a run that was refused before it touched the engine
    pub fn rejected(name: impl Into<String>, target: impl Into<PathBuf>, failure: FailureReport) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name: name.into(),
            target: target.into(),
            state: RunState::Failed,
            output: None,
            failure: Some(failure),
            teardown_failure: None,
            torn_down: false,
            started_at: Utc::now(),
            timings: PhaseTimings::default(),
        }
    }

    pub fn passed(&self) -> bool {
        self.state == RunState::Destroyed
            && self.failure.is_none()
            && self.teardown_failure.is_none()
    }

    /// The validated output, or every failure the run collected
    pub fn into_result(self) -> Result<OutputBinding, RunFailure> {
        if self.passed() {
            if let Some(output) = self.output {
                return Ok(output);
            }
        }
        Err(RunFailure {
            name: self.name,
            failure: self.failure,
            teardown_failure: self.teardown_failure,
        })
    }
}

/// Failed run, carrying the primary failure and any teardown failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub name: String,
    pub failure: Option<FailureReport>,
    pub teardown_failure: Option<FailureReport>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lifecycle run '{}' failed: ", self.name)?;
        match (&self.failure, &self.teardown_failure) {
            (Some(primary), Some(teardown)) => {
                write!(f, "{primary}; teardown also failed: {teardown}")
            }
            (Some(primary), None) => write!(f, "{primary}"),
            (None, Some(teardown)) => write!(f, "{teardown}"),
            (None, None) => f.write_str("no output was validated"),
        }
    }
}

impl std::error::Error for RunFailure {}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<RunReport>,
}

impl SuiteReport {
    pub fn from_runs(results: Vec<RunReport>, duration: Duration) -> Self {
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms: millis(duration),
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Write the report as pretty JSON into `dir`
    pub fn write(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
