//! Terraform CLI implementation of [`Provisioner`]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::diagnostics;
use crate::error::{EngineFailure, Phase, ProvisioningError, ProvisioningResult};
use crate::process::{self, CommandOutput, RunError};
use crate::provisioner::Provisioner;
use crate::target::ProvisioningTarget;

/// Environment variable overriding the engine binary
pub const TERRAFORM_BIN_ENV: &str = "INFRACHECK_TERRAFORM_BIN";

const DEFAULT_DATA_DIR: &str = ".terraform";

/// Per-phase limits. `None` waits for the engine indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub init: Option<Duration>,
    pub apply: Option<Duration>,
    pub output: Option<Duration>,
    pub destroy: Option<Duration>,
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Init => self.init,
            Phase::Apply => self.apply,
            Phase::Output | Phase::Assert => self.output,
            Phase::Destroy => self.destroy,
        }
    }
}

/// Configuration for [`TerraformDriver`]
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Engine binary, resolved through `PATH` when not absolute
    pub binary: PathBuf,

    /// Optional deadline for each phase
    pub timeouts: PhaseTimeouts,

    /// Time between SIGTERM and SIGKILL once a deadline passes
    pub interrupt_grace: Duration,

    /// Extra environment for every command (target env wins on conflict)
    pub env: BTreeMap<String, String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("terraform"),
            timeouts: PhaseTimeouts::default(),
            interrupt_grace: Duration::from_secs(10),
            env: BTreeMap::new(),
        }
    }
}

impl DriverConfig {
    /// Defaults, with the binary taken from `INFRACHECK_TERRAFORM_BIN` if set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bin) = std::env::var_os(TERRAFORM_BIN_ENV).filter(|v| !v.is_empty()) {
            config.binary = PathBuf::from(bin);
        }
        config
    }
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(default)]
    value: serde_json::Value,
}

/// Drives the `terraform` command line
#[derive(Debug, Default)]
pub struct TerraformDriver {
    config: DriverConfig,
    /// Roots whose most recent init failed; apply cannot have run there since
    uninitialized: Mutex<HashSet<PathBuf>>,
}

impl TerraformDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            uninitialized: Mutex::default(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn binary_name(&self) -> String {
        self.config.binary.display().to_string()
    }

    /// Working directory the engine keeps its init state in
    fn data_dir(&self, target: &ProvisioningTarget) -> PathBuf {
        let configured = target
            .env()
            .get("TF_DATA_DIR")
            .cloned()
            .or_else(|| self.config.env.get("TF_DATA_DIR").cloned())
            .or_else(|| std::env::var("TF_DATA_DIR").ok())
            .filter(|d| !d.is_empty());

        match configured.map(PathBuf::from) {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => target.dir().join(dir),
            None => target.dir().join(DEFAULT_DATA_DIR),
        }
    }

    fn exec(
        &self,
        phase: Phase,
        target: &ProvisioningTarget,
        args: &[String],
    ) -> ProvisioningResult<CommandOutput> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .current_dir(target.dir())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(&self.config.env)
            .envs(target.env());

        debug!(%phase, "{} {}", self.binary_name(), args.join(" "));

        let output = process::run(
            cmd,
            self.config.timeouts.for_phase(phase),
            self.config.interrupt_grace,
        )
        .map_err(|e| match e {
            RunError::Spawn(source) | RunError::Wait(source) => ProvisioningError::Process {
                phase,
                binary: self.binary_name(),
                source,
            },
            RunError::TimedOut(timeout) => ProvisioningError::Timeout { phase, timeout },
        })?;

        debug!(
            %phase,
            exit_code = ?output.exit_code,
            elapsed_ms = output.duration.as_millis() as u64,
            "engine command finished"
        );

        let diagnostics = diagnostics::parse(&output.stderr);
        for warning in diagnostics.iter().filter(|d| !d.is_error()) {
            warn!(%phase, "engine warning: {}", warning.summary);
        }

        // A zero exit with an error diagnostic still counts as a failure.
        if !output.success || diagnostics::has_errors(&diagnostics) {
            return Err(ProvisioningError::engine(
                phase,
                EngineFailure {
                    exit_code: output.exit_code,
                    diagnostics,
                    stderr: output.stderr,
                },
            ));
        }

        Ok(output)
    }
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|a| a.to_string()).collect()
}

impl Provisioner for TerraformDriver {
    fn initialize(&self, target: &ProvisioningTarget) -> ProvisioningResult<()> {
        info!("terraform init in {}", target.dir().display());
        let result = self.exec(Phase::Init, target, &args(["init", "-input=false", "-no-color"]));

        let mut uninitialized = self.uninitialized.lock();
        match result {
            Ok(_) => {
                uninitialized.remove(target.dir());
                Ok(())
            }
            Err(e) => {
                uninitialized.insert(target.dir().to_path_buf());
                Err(e)
            }
        }
    }

    fn apply(&self, target: &ProvisioningTarget) -> ProvisioningResult<()> {
        info!("terraform apply in {}", target.dir().display());
        let mut argv = args(["apply", "-auto-approve", "-input=false", "-no-color"]);
        argv.extend(target.variable_args());
        self.exec(Phase::Apply, target, &argv)?;
        Ok(())
    }

    fn output(&self, target: &ProvisioningTarget, key: &str) -> ProvisioningResult<String> {
        debug!("terraform output {}", key);
        let out = self.exec(Phase::Output, target, &args(["output", "-no-color", "-json"]))?;

        let body = out.stdout.trim();
        let mut outputs: BTreeMap<String, OutputEntry> = if body.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(body).map_err(|e| ProvisioningError::MalformedOutput {
                phase: Phase::Output,
                reason: e.to_string(),
            })?
        };

        match outputs.remove(key).map(|entry| entry.value) {
            None | Some(serde_json::Value::Null) => Err(ProvisioningError::OutputNotFound {
                key: key.to_string(),
            }),
            Some(serde_json::Value::String(value)) => Ok(value),
            Some(other) => Ok(other.to_string()),
        }
    }

    fn destroy(&self, target: &ProvisioningTarget) -> ProvisioningResult<()> {
        let data_dir = self.data_dir(target);
        if !data_dir.exists() {
            // Nothing can have been applied without init.
            info!(
                "{} was never initialized ({} missing), nothing to destroy",
                target.dir().display(),
                data_dir.display()
            );
            return Ok(());
        }
        if self.uninitialized.lock().contains(target.dir()) {
            // A half-finished init leaves the data dir behind but no usable providers.
            info!(
                "init did not complete in {}, nothing to destroy",
                target.dir().display()
            );
            return Ok(());
        }

        info!("terraform destroy in {}", target.dir().display());
        let mut argv = args(["destroy", "-auto-approve", "-input=false", "-no-color"]);
        argv.extend(target.variable_args());
        self.exec(Phase::Destroy, target, &argv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_timeouts() {
        let config = DriverConfig::default();
        assert_eq!(config.binary, PathBuf::from("terraform"));
        assert_eq!(config.timeouts, PhaseTimeouts::default());
        assert!(config.timeouts.for_phase(Phase::Apply).is_none());
        assert!(config.timeouts.for_phase(Phase::Destroy).is_none());
    }

    #[test]
    fn test_timeouts_map_to_phases() {
        let timeouts = PhaseTimeouts {
            apply: Some(Duration::from_secs(60)),
            destroy: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        assert_eq!(timeouts.for_phase(Phase::Apply), Some(Duration::from_secs(60)));
        assert_eq!(timeouts.for_phase(Phase::Destroy), Some(Duration::from_secs(30)));
        assert_eq!(timeouts.for_phase(Phase::Init), None);
    }
}
