//! `infracheck run`

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use infracheck_driver::{DriverConfig, PhaseTimeouts, TerraformDriver};
use infracheck_harness::{LifecycleSpec, OutputExpectation, SuiteReport, TimeoutSpec};
use tracing::{error, info};

use super::load_scenarios;
use crate::output::{print_error, print_list, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario files, or directories of `*.yaml` scenarios
    #[arg(conflicts_with = "dir")]
    pub scenarios: Vec<PathBuf>,

    /// Run a single ad-hoc target rooted here instead of scenario files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Variable file for the ad-hoc target (repeatable, relative to --dir)
    #[arg(long = "var-file", requires = "dir")]
    pub var_files: Vec<PathBuf>,

    /// Variable override for the ad-hoc target, as NAME=VALUE (repeatable)
    #[arg(long = "var", value_parser = parse_var, requires = "dir")]
    pub vars: Vec<(String, String)>,

    /// Output key the ad-hoc target must report
    #[arg(long, default_value = "pipeline_name")]
    pub output: String,

    /// Require the output to equal this value
    #[arg(long, conflicts_with = "expect_matches")]
    pub expect_equals: Option<String>,

    /// Require the output to match this regular expression
    #[arg(long)]
    pub expect_matches: Option<String>,

    /// Run only scenarios carrying this tag
    #[arg(short, long, conflicts_with = "dir")]
    pub tag: Option<String>,

    /// Terraform binary
    #[arg(long, env = "INFRACHECK_TERRAFORM_BIN", default_value = "terraform")]
    pub terraform_bin: PathBuf,

    /// Deadline for init, in seconds (default: none)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub init_timeout: Option<u64>,

    /// Deadline for apply, in seconds (default: none)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub apply_timeout: Option<u64>,

    /// Deadline for reading outputs, in seconds (default: none)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub output_timeout: Option<u64>,

    /// Deadline for destroy, in seconds (default: none)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub destroy_timeout: Option<u64>,

    /// Seconds between SIGTERM and SIGKILL once a deadline passes
    #[arg(long, default_value = "10")]
    pub interrupt_grace: u64,

    /// Output directory for the JSON results file
    #[arg(short = 'o', long, default_value = "test-results")]
    pub results_dir: PathBuf,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got {raw:?}")),
    }
}

impl RunArgs {
    fn driver_config(&self) -> DriverConfig {
        let timeouts = TimeoutSpec {
            init_secs: self.init_timeout,
            apply_secs: self.apply_timeout,
            output_secs: self.output_timeout,
            destroy_secs: self.destroy_timeout,
        };
        DriverConfig {
            binary: self.terraform_bin.clone(),
            timeouts: timeouts.apply_to(PhaseTimeouts::default()),
            interrupt_grace: Duration::from_secs(self.interrupt_grace),
            env: BTreeMap::new(),
        }
    }

    fn expectation(&self) -> OutputExpectation {
        match (&self.expect_equals, &self.expect_matches) {
            (Some(value), _) => OutputExpectation::Equals {
                value: value.clone(),
            },
            (None, Some(pattern)) => OutputExpectation::Matches {
                pattern: pattern.clone(),
            },
            (None, None) => OutputExpectation::NonEmpty,
        }
    }

    fn ad_hoc_spec(&self, dir: &Path) -> LifecycleSpec {
        let name = dir
            .canonicalize()
            .ok()
            .and_then(|d| d.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| dir.display().to_string());

        LifecycleSpec {
            name,
            description: String::new(),
            tags: Vec::new(),
            dir: dir.to_path_buf(),
            var_files: self.var_files.clone(),
            vars: self.vars.iter().cloned().collect(),
            env: BTreeMap::new(),
            output: self.output.clone(),
            expect: self.expectation(),
            timeouts: TimeoutSpec::default(),
        }
    }

    fn specs(&self) -> Result<Vec<LifecycleSpec>> {
        match &self.dir {
            Some(dir) => Ok(vec![self.ad_hoc_spec(dir)]),
            None if self.scenarios.is_empty() => {
                bail!("nothing to run: pass scenario files or --dir")
            }
            None => load_scenarios(&self.scenarios, self.tag.as_deref()),
        }
    }
}

/// Runs execute in parallel, so no two may drive the same configuration root
fn ensure_distinct_roots(specs: &[LifecycleSpec]) -> Result<()> {
    let mut seen: HashMap<PathBuf, &str> = HashMap::new();
    for spec in specs {
        let root = spec.target()?.dir().to_path_buf();
        if let Some(other) = seen.insert(root.clone(), spec.name.as_str()) {
            bail!(
                "scenarios '{other}' and '{}' share configuration root {}; \
                 concurrent runs would share engine state",
                spec.name,
                root.display()
            );
        }
    }
    Ok(())
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<bool> {
    let specs = args.specs()?;
    for spec in &specs {
        spec.validate()?;
    }
    ensure_distinct_roots(&specs)?;

    let base = args.driver_config();
    let start = Instant::now();
    info!("Running {} lifecycle scenario(s)...", specs.len());

    // Each run blocks on the engine; give every one its own blocking thread.
    let tasks = specs.into_iter().map(|spec| {
        let config = spec.driver_config(&base);
        tokio::task::spawn_blocking(move || {
            let driver = TerraformDriver::new(config);
            spec.execute(&driver)
        })
    });
    let reports = futures::future::join_all(tasks)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .context("lifecycle task aborted")?;

    for report in &reports {
        if report.passed() {
            info!("✓ {} ({} ms)", report.name, report.timings.total_ms);
        } else {
            error!(
                "✗ {} - {}",
                report.name,
                report
                    .failure
                    .as_ref()
                    .or(report.teardown_failure.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    let suite = SuiteReport::from_runs(reports, start.elapsed());
    info!(
        "Lifecycle Results: {} passed, {} failed ({} ms)",
        suite.passed, suite.failed, suite.duration_ms
    );

    print_list(&suite.results, format);
    suite.write(&args.results_dir)?;

    if suite.all_passed() {
        print_success(&format!("{} lifecycle run(s) passed", suite.passed));
    } else {
        print_error(&format!("{} of {} lifecycle run(s) failed", suite.failed, suite.total));
    }
    Ok(suite.all_passed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("environment=ci").unwrap(),
            ("environment".to_string(), "ci".to_string())
        );
        assert_eq!(
            parse_var("tags={a=1}").unwrap(),
            ("tags".to_string(), "{a=1}".to_string())
        );
        assert!(parse_var("=x").is_err());
        assert!(parse_var("novalue").is_err());
    }

    #[test]
    fn test_ad_hoc_target_flags() {
        let args = Harness::parse_from([
            "infracheck",
            "--dir",
            "../Terraform",
            "--var-file",
            "terraform.tfvars",
            "--var",
            "environment=ci",
            "--expect-matches",
            "^currency-",
            "--apply-timeout",
            "1800",
        ])
        .run;

        let specs = args.specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].output, "pipeline_name");
        assert_eq!(specs[0].vars.get("environment").map(String::as_str), Some("ci"));
        assert_eq!(
            specs[0].expect,
            OutputExpectation::Matches {
                pattern: "^currency-".to_string()
            }
        );

        let config = args.driver_config();
        assert_eq!(config.timeouts.apply, Some(Duration::from_secs(1800)));
        assert_eq!(config.timeouts.destroy, None);
    }

    #[test]
    fn test_scenarios_conflict_with_dir() {
        let parsed = Harness::try_parse_from(["infracheck", "pipeline.yaml", "--dir", "tf"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let parsed = Harness::try_parse_from(["infracheck", "--dir", "tf", "--apply-timeout", "0"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_tag_conflicts_with_dir() {
        let parsed = Harness::try_parse_from(["infracheck", "--dir", "tf", "--tag", "smoke"]);
        assert!(parsed.is_err());
    }

    fn scenario_root() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        for root in ["pipeline", "other"] {
            std::fs::create_dir(dir.path().join(root)).unwrap();
            std::fs::write(dir.path().join(root).join("main.tf"), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_scenarios_sharing_a_root_are_rejected() {
        let dir = scenario_root();
        std::fs::write(dir.path().join("a.yaml"), "name: a\ndir: pipeline\noutput: x\n").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: b\ndir: ./pipeline\noutput: x\n").unwrap();

        let args = Harness::parse_from(["infracheck", dir.path().to_str().unwrap()]).run;
        let specs = args.specs().unwrap();
        assert_eq!(specs.len(), 2);

        let err = ensure_distinct_roots(&specs).unwrap_err().to_string();
        assert!(err.contains("'a' and 'b'"), "error: {err}");
    }

    #[test]
    fn test_scenarios_with_distinct_roots_run() {
        let dir = scenario_root();
        std::fs::write(dir.path().join("a.yaml"), "name: a\ndir: pipeline\noutput: x\n").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: b\ndir: other\noutput: x\n").unwrap();

        let args = Harness::parse_from(["infracheck", dir.path().to_str().unwrap()]).run;
        ensure_distinct_roots(&args.specs().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_shared_root_suite_never_starts() {
        let dir = scenario_root();
        std::fs::write(dir.path().join("a.yaml"), "name: a\ndir: pipeline\noutput: x\n").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: b\ndir: pipeline\noutput: x\n").unwrap();
        let results = dir.path().join("results");

        let args = Harness::parse_from([
            "infracheck",
            dir.path().to_str().unwrap(),
            "--terraform-bin",
            "/nonexistent/infracheck/terraform",
            "--results-dir",
            results.to_str().unwrap(),
        ])
        .run;

        assert!(execute(args, OutputFormat::Json).await.is_err());
        assert!(!results.exists());
    }

    #[test]
    fn test_nothing_to_run() {
        let args = Harness::parse_from(["infracheck"]).run;
        assert!(args.specs().is_err());
    }
}
