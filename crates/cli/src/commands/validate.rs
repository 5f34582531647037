//! `infracheck validate`

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::load_scenarios;
use crate::output::{print_error, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario files, or directories of `*.yaml` scenarios
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ScenarioCheck {
    name: String,
    dir: PathBuf,
    output: String,
    expect: String,
    error: Option<String>,
}

impl TableDisplay for ScenarioCheck {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Directory", "Output", "Expectation", "Status"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.dir.display().to_string(),
            self.output.clone(),
            self.expect.clone(),
            self.error.clone().unwrap_or_else(|| "ok".to_string()),
        ]
    }
}

pub fn execute(args: ValidateArgs, format: OutputFormat) -> Result<bool> {
    let specs = load_scenarios(&args.scenarios, None)?;

    let checks: Vec<ScenarioCheck> = specs
        .iter()
        .map(|spec| ScenarioCheck {
            name: spec.name.clone(),
            dir: spec.dir.clone(),
            output: spec.output.clone(),
            expect: spec.expect.to_string(),
            error: spec.validate().err().map(|e| e.to_string()),
        })
        .collect();

    print_list(&checks, format);

    let invalid = checks.iter().filter(|c| c.error.is_some()).count();
    if invalid == 0 {
        print_success(&format!("{} scenario(s) valid", checks.len()));
        Ok(true)
    } else {
        print_error(&format!("{invalid} of {} scenario(s) invalid", checks.len()));
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pipeline")).unwrap();
        fs::write(dir.path().join("pipeline/main.tf"), "output \"pipeline_name\" { value = \"x\" }\n").unwrap();
        dir
    }

    #[test]
    fn test_valid_scenarios() {
        let dir = workspace();
        fs::write(
            dir.path().join("pipeline.yaml"),
            "name: pipeline\ndir: pipeline\noutput: pipeline_name\n",
        )
        .unwrap();

        let args = ValidateArgs {
            scenarios: vec![dir.path().to_path_buf()],
        };
        assert!(execute(args, OutputFormat::Json).unwrap());
    }

    #[test]
    fn test_invalid_scenario_reported() {
        let dir = workspace();
        fs::write(
            dir.path().join("broken.yaml"),
            "name: broken\ndir: pipeline\noutput: pipeline_name\nexpect:\n  kind: matches\n  pattern: \"(\"\n",
        )
        .unwrap();

        let args = ValidateArgs {
            scenarios: vec![dir.path().join("broken.yaml")],
        };
        assert!(!execute(args, OutputFormat::Json).unwrap());
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let args = ValidateArgs {
            scenarios: vec![PathBuf::from("/nonexistent/infracheck/scenario.yaml")],
        };
        assert!(execute(args, OutputFormat::Table).is_err());
    }
}
