//! Declarative YAML lifecycle scenarios

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use infracheck_driver::{
    DriverConfig, PhaseTimeouts, ProvisioningError, ProvisioningTarget, Provisioner,
};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::expect::OutputExpectation;
use crate::report::RunReport;
use crate::run::{rejected_target, run_lifecycle};

/// One lifecycle scenario parsed from YAML.
///
/// ```yaml
/// name: currency-converter-pipeline
/// dir: ../Terraform               # relative to this file
/// var_files:
///   - terraform.tfvars            # relative to `dir`
/// output: pipeline_name
/// expect:
///   kind: non_empty
/// timeouts:
///   apply_secs: 1800
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSpec {
    /// Unique name for this scenario
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Configuration root
    pub dir: PathBuf,

    /// Variable-input files, merged in order
    #[serde(default)]
    pub var_files: Vec<PathBuf>,

    /// Inline variable overrides
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Extra environment for the engine
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Output key under test
    pub output: String,

    #[serde(default)]
    pub expect: OutputExpectation,

    #[serde(default)]
    pub timeouts: TimeoutSpec,
}

/// Optional per-phase deadlines, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub init_secs: Option<u64>,
    pub apply_secs: Option<u64>,
    pub output_secs: Option<u64>,
    pub destroy_secs: Option<u64>,
}

impl TimeoutSpec {
    /// Overlay the timeouts set here onto `base`
    pub fn apply_to(&self, base: PhaseTimeouts) -> PhaseTimeouts {
        let secs = |s: Option<u64>, fallback: Option<Duration>| {
            s.map(Duration::from_secs).or(fallback)
        };
        PhaseTimeouts {
            init: secs(self.init_secs, base.init),
            apply: secs(self.apply_secs, base.apply),
            output: secs(self.output_secs, base.output),
            destroy: secs(self.destroy_secs, base.destroy),
        }
    }

    fn zero_field(&self) -> Option<&'static str> {
        [
            ("init_secs", self.init_secs),
            ("apply_secs", self.apply_secs),
            ("output_secs", self.output_secs),
            ("destroy_secs", self.destroy_secs),
        ]
        .into_iter()
        .find(|(_, v)| *v == Some(0))
        .map(|(name, _)| name)
    }
}

impl LifecycleSpec {
    /// Parse a scenario from a YAML string. Relative paths stay relative
    /// to the current directory.
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    /// Parse a scenario file; a relative `dir` resolves against the file's directory
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut spec = Self::from_yaml(&content)?;
        if spec.dir.is_relative() {
            if let Some(parent) = path.parent() {
                spec.dir = parent.join(&spec.dir);
            }
        }
        Ok(spec)
    }

    /// Load all scenarios under a directory, sorted by path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            let is_yaml = entry
                .path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if entry.file_type().is_file() && is_yaml {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Load a single file, or every scenario under a directory
    pub fn load(path: &Path) -> HarnessResult<Vec<Self>> {
        if path.is_dir() {
            Self::load_all(path)
        } else {
            Ok(vec![Self::from_file(path)?])
        }
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn invalid(&self, reason: impl Into<String>) -> HarnessError {
        HarnessError::InvalidSpec {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check everything that can be checked without the engine
    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name is empty"));
        }
        if self.output.trim().is_empty() {
            return Err(self.invalid("output key is empty"));
        }
        self.expect.validate().map_err(|reason| self.invalid(reason))?;
        if let Some(field) = self.timeouts.zero_field() {
            return Err(self.invalid(format!("timeouts.{field} must be greater than zero")));
        }
        self.target().map_err(|e| self.invalid(e.to_string()))?;
        Ok(())
    }

    /// Build the provisioning target this scenario describes
    pub fn target(&self) -> Result<ProvisioningTarget, ProvisioningError> {
        let mut builder = ProvisioningTarget::builder(&self.dir).var_files(self.var_files.iter().cloned());
        for (name, value) in &self.vars {
            builder = builder.var(name.clone(), value.clone());
        }
        for (name, value) in &self.env {
            builder = builder.env(name.clone(), value.clone());
        }
        builder.build()
    }

    /// Driver settings for this scenario on top of `base`
    pub fn driver_config(&self, base: &DriverConfig) -> DriverConfig {
        DriverConfig {
            timeouts: self.timeouts.apply_to(base.timeouts),
            ..base.clone()
        }
    }

    /// Run the full lifecycle for this scenario
    pub fn execute<P: Provisioner + ?Sized>(&self, provisioner: &P) -> RunReport {
        match self.target() {
            Ok(target) => run_lifecycle(&self.name, provisioner, target, &self.output, &self.expect),
            Err(e) => rejected_target(&self.name, &self.dir, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PIPELINE_SPEC: &str = r#"
name: currency-converter-pipeline
description: CodePipeline for the currency converter service
tags:
  - pipeline
  - smoke
dir: terraform
var_files:
  - terraform.tfvars
vars:
  environment: ci
output: pipeline_name
timeouts:
  apply_secs: 1800
"#;

    fn workspace() -> TempDir {
        let root = TempDir::new().unwrap();
        let tf = root.path().join("terraform");
        std::fs::create_dir(&tf).unwrap();
        std::fs::write(tf.join("main.tf"), "").unwrap();
        std::fs::write(tf.join("terraform.tfvars"), "").unwrap();
        root
    }

    #[test]
    fn test_parse_pipeline_spec() {
        let spec = LifecycleSpec::from_yaml(PIPELINE_SPEC).unwrap();
        assert_eq!(spec.name, "currency-converter-pipeline");
        assert_eq!(spec.output, "pipeline_name");
        assert_eq!(spec.expect, OutputExpectation::NonEmpty);
        assert_eq!(spec.timeouts.apply_secs, Some(1800));
        assert_eq!(spec.vars.get("environment").map(String::as_str), Some("ci"));
    }

    #[test]
    fn test_from_file_resolves_dir_against_file() {
        let root = workspace();
        let file = root.path().join("pipeline.yaml");
        std::fs::write(&file, PIPELINE_SPEC).unwrap();

        let spec = LifecycleSpec::from_file(&file).unwrap();
        assert_eq!(spec.dir, root.path().join("terraform"));
        spec.validate().unwrap();

        let target = spec.target().unwrap();
        assert!(target.var_files()[0].ends_with("terraform/terraform.tfvars"));
    }

    #[test]
    fn test_load_all_sorted_and_filtered() {
        let root = workspace();
        let nested = root.path().join("scenarios").join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.path().join("scenarios").join("b.yaml"),
            "name: b\ndir: .\noutput: x\n",
        )
        .unwrap();
        std::fs::write(nested.join("a.yml"), "name: a\ndir: .\noutput: x\ntags: [smoke]\n").unwrap();
        std::fs::write(root.path().join("scenarios").join("notes.txt"), "ignored").unwrap();

        let specs = LifecycleSpec::load_all(&root.path().join("scenarios")).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);

        let smoke = LifecycleSpec::filter_by_tag(&specs, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(smoke[0].name, "a");
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_bad_pattern() {
        let root = workspace();
        let mut spec = LifecycleSpec::from_yaml(PIPELINE_SPEC).unwrap();
        spec.dir = root.path().join("terraform");
        spec.validate().unwrap();

        spec.timeouts.destroy_secs = Some(0);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.destroy_secs"));

        spec.timeouts.destroy_secs = None;
        spec.expect = OutputExpectation::Matches {
            pattern: "[".to_string(),
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_driver_config_overlays_timeouts() {
        let spec = LifecycleSpec::from_yaml(PIPELINE_SPEC).unwrap();
        let base = DriverConfig {
            timeouts: PhaseTimeouts {
                destroy: Some(Duration::from_secs(600)),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = spec.driver_config(&base);
        assert_eq!(config.timeouts.apply, Some(Duration::from_secs(1800)));
        assert_eq!(config.timeouts.destroy, Some(Duration::from_secs(600)));
        assert_eq!(config.timeouts.init, None);
    }
}
