//! One apply → validate → destroy cycle with guaranteed teardown

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use infracheck_driver::{Phase, ProvisioningError, ProvisioningTarget, Provisioner};
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::expect::{OutputBinding, OutputExpectation};
use crate::report::{millis, FailureReport, PhaseTimings, RunReport};
use crate::state::RunState;

/// A single lifecycle run.
///
/// Teardown is armed the moment the run is constructed and fires exactly
/// once: through [`LifecycleRun::finish`] on the normal path, or from `Drop`
/// when the run goes out of scope early (a `?`, a panicking assertion).
/// Nothing else in the harness calls `destroy`.
///
/// A destroy failure in `Drop` has no caller to go to, so outside of an
/// existing panic it panics with both the earlier failure and the destroy
/// error. Prefer `finish()`, which returns them in the [`RunReport`].
///
/// ```no_run
/// use infracheck_driver::{DriverConfig, ProvisioningTarget, TerraformDriver};
/// use infracheck_harness::{LifecycleRun, OutputExpectation};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = TerraformDriver::new(DriverConfig::from_env());
/// let target = ProvisioningTarget::builder("../Terraform")
///     .var_file("terraform.tfvars")
///     .build()?;
///
/// let mut run = LifecycleRun::new("currency-converter", &driver, target);
/// run.provision()?;
/// run.validate("pipeline_name", &OutputExpectation::NonEmpty)?;
/// let binding = run.finish().into_result()?;
/// assert!(!binding.value.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct LifecycleRun<'p, P: Provisioner + ?Sized> {
    id: Uuid,
    name: String,
    provisioner: &'p P,
    target: ProvisioningTarget,
    state: RunState,
    teardown_armed: bool,
    failure: Option<FailureReport>,
    output: Option<OutputBinding>,
    timings: PhaseTimings,
    started_at: DateTime<Utc>,
    clock: Instant,
    span: Span,
}

impl<'p, P: Provisioner + ?Sized> LifecycleRun<'p, P> {
    /// Create a run and arm its teardown. Does not touch the engine.
    pub fn new(name: impl Into<String>, provisioner: &'p P, target: ProvisioningTarget) -> Self {
        let id = Uuid::new_v4();
        let name = name.into();
        let span = info_span!(
            "lifecycle",
            run_id = %id,
            name = %name,
            target = %target.dir().display()
        );
        span.in_scope(|| info!("lifecycle run created, teardown armed"));

        Self {
            id,
            name,
            provisioner,
            target,
            state: RunState::Pending,
            teardown_armed: true,
            failure: None,
            output: None,
            timings: PhaseTimings::default(),
            started_at: Utc::now(),
            clock: Instant::now(),
            span,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &ProvisioningTarget {
        &self.target
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// True until teardown has been attempted
    pub fn teardown_pending(&self) -> bool {
        self.teardown_armed
    }

    /// Initialize, then apply. `Pending → Applied`, or `Failed`.
    pub fn provision(&mut self) -> Result<(), LifecycleError> {
        self.require(RunState::Pending, Phase::Apply)?;
        let _entered = self.span.clone().entered();

        let started = Instant::now();
        let result = self.provisioner.initialize(&self.target);
        self.timings.init_ms = Some(millis(started.elapsed()));
        if let Err(e) = result {
            return Err(self.fail(e.into()));
        }
        info!("initialized");

        let started = Instant::now();
        let result = self.provisioner.apply(&self.target);
        self.timings.apply_ms = Some(millis(started.elapsed()));
        if let Err(e) = result {
            return Err(self.fail(e.into()));
        }

        self.transition(RunState::Applied);
        info!("applied in {} ms", self.timings.apply_ms.unwrap_or_default());
        Ok(())
    }

    /// Read `key` from provisioned state without asserting on it.
    ///
    /// A missing key fails the run with `OutputNotFound`.
    pub fn output(&mut self, key: &str) -> Result<OutputBinding, LifecycleError> {
        self.require(RunState::Applied, Phase::Output)?;
        let _entered = self.span.clone().entered();
        self.read_output(key).map_err(|e| self.fail(e))
    }

    /// Read `key` and check it against `expectation`. `Applied → Validated`.
    pub fn validate(
        &mut self,
        key: &str,
        expectation: &OutputExpectation,
    ) -> Result<OutputBinding, LifecycleError> {
        self.require(RunState::Applied, Phase::Assert)?;
        let _entered = self.span.clone().entered();

        let binding = self.read_output(key).map_err(|e| self.fail(e))?;
        if let Err(e) = expectation.check(&binding) {
            return Err(self.fail(e.into()));
        }

        self.output = Some(binding.clone());
        self.transition(RunState::Validated);
        info!(key, "output is {}", expectation);
        Ok(binding)
    }

    /// Tear down and close the run.
    ///
    /// A run that never reached `Validated` is reported as failed; a destroy
    /// failure is recorded next to any earlier failure.
    pub fn finish(mut self) -> RunReport {
        let _entered = self.span.clone().entered();

        if self.state != RunState::Validated && self.failure.is_none() {
            let state = self.state;
            self.fail(LifecycleError::Incomplete { state });
        }

        let teardown_failure = match self.teardown() {
            Some(Err(e)) => Some(FailureReport::from(&LifecycleError::from(e))),
            _ => None,
        };
        let torn_down = teardown_failure.is_none();

        match (&teardown_failure, self.state) {
            (None, RunState::Validated) => self.transition(RunState::Destroyed),
            (Some(_), RunState::Validated) => self.transition(RunState::Failed),
            _ => {}
        }
        self.timings.total_ms = millis(self.clock.elapsed());

        let report = RunReport {
            run_id: self.id,
            name: self.name.clone(),
            target: self.target.dir().to_path_buf(),
            state: self.state,
            output: self.output.take(),
            failure: self.failure.take(),
            teardown_failure,
            torn_down,
            started_at: self.started_at,
            timings: self.timings.clone(),
        };

        if report.passed() {
            info!("lifecycle passed in {} ms", report.timings.total_ms);
        } else {
            warn!(state = %report.state, "lifecycle failed");
        }
        report
    }

    fn read_output(&mut self, key: &str) -> Result<OutputBinding, LifecycleError> {
        let started = Instant::now();
        let result = self.provisioner.output(&self.target, key);
        self.timings.output_ms = Some(millis(started.elapsed()));

        let value = result?;
        Ok(OutputBinding {
            key: key.to_string(),
            value,
        })
    }

    /// Run destroy if it has not run yet. `None` once teardown is spent.
    fn teardown(&mut self) -> Option<Result<(), ProvisioningError>> {
        if !std::mem::replace(&mut self.teardown_armed, false) {
            return None;
        }

        info!("tearing down");
        let started = Instant::now();
        let result = self.provisioner.destroy(&self.target);
        self.timings.destroy_ms = Some(millis(started.elapsed()));

        match &result {
            Ok(()) => info!("teardown complete"),
            Err(e) => error!(phase = %Phase::Destroy, "teardown failed: {}", e),
        }
        Some(result)
    }

    fn require(&self, expected: RunState, phase: Phase) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::OutOfOrder {
                phase,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            error!("refusing lifecycle transition {} -> {}", self.state, next);
        }
    }

    /// Record the first failure and move to `Failed`. Returns `err` for the caller.
    fn fail(&mut self, err: LifecycleError) -> LifecycleError {
        error!(phase = %err.phase(), "{}", err);
        if self.failure.is_none() {
            self.failure = Some(FailureReport::from(&err));
        }
        self.transition(RunState::Failed);
        err
    }
}

impl<'p, P: Provisioner + ?Sized> Drop for LifecycleRun<'p, P> {
    fn drop(&mut self) {
        if !self.teardown_armed {
            return;
        }
        let _entered = self.span.clone().entered();
        if std::thread::panicking() {
            warn!("run is unwinding, tearing down before exit");
        } else {
            warn!("run dropped without finish(), tearing down");
        }
        let Some(Err(e)) = self.teardown() else {
            return;
        };
        // Already unwinding: the logged failure is all that can be done.
        if std::thread::panicking() {
            return;
        }
        // No caller is left to receive the destroy error, so fail loudly.
        let primary = self
            .failure
            .as_ref()
            .map(|f| format!("{f}; "))
            .unwrap_or_default();
        panic!(
            "lifecycle run '{}' failed: {}teardown also failed: {}",
            self.name,
            primary,
            FailureReport::from(&LifecycleError::from(e))
        );
    }
}

/// Run the whole protocol for one target and report the outcome
pub fn run_lifecycle<P: Provisioner + ?Sized>(
    name: &str,
    provisioner: &P,
    target: ProvisioningTarget,
    key: &str,
    expectation: &OutputExpectation,
) -> RunReport {
    let mut run = LifecycleRun::new(name, provisioner, target);
    // Failures are recorded on the run and surface through the report.
    if run.provision().is_ok() {
        let _ = run.validate(key, expectation);
    }
    run.finish()
}

/// Report for a target that could not be built
pub(crate) fn rejected_target(name: &str, dir: &Path, err: ProvisioningError) -> RunReport {
    let err = LifecycleError::from(err);
    warn!(name, "target rejected: {}", err);
    RunReport::rejected(name, dir, FailureReport::from(&err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeProvisioner};
    use tempfile::TempDir;

    fn target() -> (TempDir, ProvisioningTarget) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.tf"), "").unwrap();
        let target = ProvisioningTarget::builder(dir.path()).build().unwrap();
        (dir, target)
    }

    #[test]
    fn test_happy_path_states() {
        let (_dir, target) = target();
        let fake = FakeProvisioner::new().with_output("pipeline_name", "cc-pipeline");

        let mut run = LifecycleRun::new("happy", &fake, target);
        assert_eq!(run.state(), RunState::Pending);
        assert!(run.teardown_pending());

        run.provision().unwrap();
        assert_eq!(run.state(), RunState::Applied);

        let binding = run.validate("pipeline_name", &OutputExpectation::NonEmpty).unwrap();
        assert_eq!(binding.value, "cc-pipeline");
        assert_eq!(run.state(), RunState::Validated);

        let report = run.finish();
        assert_eq!(report.state, RunState::Destroyed);
        assert!(report.passed());
        assert!(report.torn_down);
        assert!(report.timings.destroy_ms.is_some());
        assert_eq!(
            fake.calls(),
            vec![
                Call::Initialize,
                Call::Apply,
                Call::Output("pipeline_name".to_string()),
                Call::Destroy,
            ]
        );
    }

    #[test]
    fn test_validate_before_provision_is_out_of_order() {
        let (_dir, target) = target();
        let fake = FakeProvisioner::new().with_output("pipeline_name", "cc-pipeline");

        let mut run = LifecycleRun::new("early", &fake, target);
        let err = run
            .validate("pipeline_name", &OutputExpectation::NonEmpty)
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::OutOfOrder { phase: Phase::Assert, state: RunState::Pending }
        ));
        // A caller mistake does not consume the run.
        assert_eq!(run.state(), RunState::Pending);
        drop(run);
        assert_eq!(fake.destroy_calls(), 1);
    }

    #[test]
    fn test_finish_without_validation_fails() {
        let (_dir, target) = target();
        let fake = FakeProvisioner::new().with_output("pipeline_name", "cc-pipeline");

        let mut run = LifecycleRun::new("unvalidated", &fake, target);
        run.provision().unwrap();
        let report = run.finish();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failure.unwrap().phase, Phase::Assert);
        assert!(report.torn_down);
        assert_eq!(fake.destroy_calls(), 1);
    }

    #[test]
    fn test_teardown_failure_after_success_fails_run() {
        let (_dir, target) = target();
        let fake = FakeProvisioner::new()
            .with_output("pipeline_name", "cc-pipeline")
            .failing_destroy("DependencyViolation");

        let report = run_lifecycle(
            "leaky",
            &fake,
            target,
            "pipeline_name",
            &OutputExpectation::NonEmpty,
        );

        assert_eq!(report.state, RunState::Failed);
        assert!(report.failure.is_none());
        let teardown = report.teardown_failure.clone().unwrap();
        assert_eq!(teardown.phase, Phase::Destroy);
        assert!(teardown.message.contains("DependencyViolation"));
        assert!(!report.passed());
        assert!(!report.torn_down);
    }
}
