//! Provisioning target - configuration root plus variable inputs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ProvisioningError, ProvisioningResult};

/// Identifies what to provision for one lifecycle run.
///
/// Constructed through [`TargetBuilder`], which checks that the
/// configuration root and every variable file exist before any engine
/// command runs. Fields are private so a built target cannot drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningTarget {
    dir: PathBuf,
    var_files: Vec<PathBuf>,
    vars: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl ProvisioningTarget {
    /// Start building a target rooted at `dir`
    pub fn builder(dir: impl Into<PathBuf>) -> TargetBuilder {
        TargetBuilder {
            dir: dir.into(),
            var_files: Vec::new(),
            vars: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    /// Absolute configuration root
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute variable-input files, in merge order
    pub fn var_files(&self) -> &[PathBuf] {
        &self.var_files
    }

    /// Inline `-var` overrides, applied after the var files
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Extra environment for every engine command against this target
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// `-var-file=` / `-var` arguments shared by apply and destroy
    pub fn variable_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.var_files.len() + self.vars.len() * 2);
        for file in &self.var_files {
            args.push(format!("-var-file={}", file.display()));
        }
        for (name, value) in &self.vars {
            args.push("-var".to_string());
            args.push(format!("{name}={value}"));
        }
        args
    }
}

/// Builder for [`ProvisioningTarget`]
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    dir: PathBuf,
    var_files: Vec<PathBuf>,
    vars: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl TargetBuilder {
    /// Add a variable-input file. Relative paths resolve against the
    /// configuration root, the directory the engine runs in.
    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn var_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.var_files.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Validate and freeze the target
    pub fn build(self) -> ProvisioningResult<ProvisioningTarget> {
        if !self.dir.is_dir() {
            return Err(ProvisioningError::InvalidTarget(format!(
                "configuration root {} is not a directory",
                self.dir.display()
            )));
        }
        let dir = self.dir.canonicalize().map_err(|e| {
            ProvisioningError::InvalidTarget(format!(
                "cannot resolve configuration root {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        if !has_configuration_files(&dir)? {
            return Err(ProvisioningError::InvalidTarget(format!(
                "no .tf or .tf.json files in {}",
                dir.display()
            )));
        }

        let mut var_files = Vec::with_capacity(self.var_files.len());
        for file in self.var_files {
            let joined = if file.is_absolute() { file } else { dir.join(file) };
            if !joined.is_file() {
                return Err(ProvisioningError::InvalidTarget(format!(
                    "variable file {} does not exist",
                    joined.display()
                )));
            }
            let resolved = joined.canonicalize().map_err(|e| {
                ProvisioningError::InvalidTarget(format!(
                    "cannot resolve variable file {}: {}",
                    joined.display(),
                    e
                ))
            })?;
            var_files.push(resolved);
        }

        if let Some(name) = self.vars.keys().find(|k| k.trim().is_empty()) {
            return Err(ProvisioningError::InvalidTarget(format!(
                "variable name {name:?} is empty"
            )));
        }

        Ok(ProvisioningTarget {
            dir,
            var_files,
            vars: self.vars,
            env: self.env,
        })
    }
}

fn has_configuration_files(dir: &Path) -> ProvisioningResult<bool> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ProvisioningError::InvalidTarget(format!("cannot read {}: {}", dir.display(), e))
    })?;

    Ok(entries.filter_map(|e| e.ok()).any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        entry.path().is_file() && (name.ends_with(".tf") || name.ends_with(".tf.json"))
    }))
}
