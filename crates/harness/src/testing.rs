//! In-memory [`Provisioner`] double with failure injection
//!
//! Records every call so tests can assert on ordering and on how many
//! times teardown ran, without a real engine or backend.

use std::collections::BTreeMap;

use infracheck_driver::{
    EngineFailure, Phase, ProvisioningError, ProvisioningResult, ProvisioningTarget, Provisioner,
};
use parking_lot::Mutex;

/// A recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize,
    Apply,
    Output(String),
    Destroy,
}

#[derive(Debug, Default)]
struct Backend {
    initialized: bool,
    /// Outputs of currently provisioned resources
    state: BTreeMap<String, String>,
    resources_created: usize,
    calls: Vec<Call>,
}

/// Scriptable provisioner for harness tests
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    declared: BTreeMap<String, String>,
    init_error: Option<String>,
    apply_error: Option<String>,
    partial_apply: bool,
    destroy_error: Option<String>,
    backend: Mutex<Backend>,
}

fn engine_error(phase: Phase, message: &str) -> ProvisioningError {
    let stderr = format!("╷\n│ Error: {message}\n╵\n");
    ProvisioningError::engine(phase, EngineFailure::new(Some(1), stderr))
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an output that apply will put into state
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.declared.insert(key.into(), value.into());
        self
    }

    pub fn failing_init(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    /// Apply fails before creating anything
    pub fn failing_apply(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self.partial_apply = false;
        self
    }

    /// Apply creates the declared resources, then fails
    pub fn partially_applying(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self.partial_apply = true;
        self
    }

    pub fn failing_destroy(mut self, message: impl Into<String>) -> Self {
        self.destroy_error = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.backend.lock().calls.clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.backend.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn initialize_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Initialize))
    }

    pub fn apply_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Apply))
    }

    pub fn output_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Output(_)))
    }

    pub fn destroy_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Destroy))
    }

    /// Whether anything is still provisioned
    pub fn is_provisioned(&self) -> bool {
        !self.backend.lock().state.is_empty()
    }

    /// How many times resources were actually created
    pub fn resources_created(&self) -> usize {
        self.backend.lock().resources_created
    }

    fn provision(&self, backend: &mut Backend) {
        if backend.state.is_empty() && !self.declared.is_empty() {
            backend.state = self.declared.clone();
            backend.resources_created += 1;
        }
    }
}

impl Provisioner for FakeProvisioner {
    fn initialize(&self, _target: &ProvisioningTarget) -> ProvisioningResult<()> {
        let mut backend = self.backend.lock();
        backend.calls.push(Call::Initialize);
        if let Some(message) = &self.init_error {
            return Err(engine_error(Phase::Init, message));
        }
        backend.initialized = true;
        Ok(())
    }

    fn apply(&self, _target: &ProvisioningTarget) -> ProvisioningResult<()> {
        let mut backend = self.backend.lock();
        backend.calls.push(Call::Apply);
        if !backend.initialized {
            return Err(engine_error(Phase::Apply, "Backend initialization required"));
        }
        if let Some(message) = &self.apply_error {
            if self.partial_apply {
                self.provision(&mut backend);
            }
            return Err(engine_error(Phase::Apply, message));
        }
        self.provision(&mut backend);
        Ok(())
    }

    fn output(&self, _target: &ProvisioningTarget, key: &str) -> ProvisioningResult<String> {
        let mut backend = self.backend.lock();
        backend.calls.push(Call::Output(key.to_string()));
        backend
            .state
            .get(key)
            .cloned()
            .ok_or_else(|| ProvisioningError::OutputNotFound {
                key: key.to_string(),
            })
    }

    fn destroy(&self, _target: &ProvisioningTarget) -> ProvisioningResult<()> {
        let mut backend = self.backend.lock();
        backend.calls.push(Call::Destroy);
        if let Some(message) = &self.destroy_error {
            return Err(engine_error(Phase::Destroy, message));
        }
        backend.state.clear();
        Ok(())
    }
}
