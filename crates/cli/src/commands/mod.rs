//! CLI command implementations

pub mod run;
pub mod validate;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use infracheck_harness::LifecycleSpec;

/// Load scenarios from files and directories, optionally keeping one tag
pub fn load_scenarios(paths: &[PathBuf], tag: Option<&str>) -> Result<Vec<LifecycleSpec>> {
    let mut specs = Vec::new();
    for path in paths {
        let loaded = LifecycleSpec::load(path)
            .with_context(|| format!("loading scenarios from {}", path.display()))?;
        specs.extend(loaded);
    }

    if let Some(tag) = tag {
        specs = LifecycleSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
    }

    if specs.is_empty() {
        bail!("no scenarios found");
    }
    Ok(specs)
}
