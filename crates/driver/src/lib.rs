//! InfraCheck provisioning driver
//!
//! Wraps the provisioning engine's command-line workflow behind the
//! [`Provisioner`] trait:
//!
//! ```text
//! initialize(target)      terraform init    -input=false -no-color
//! apply(target)           terraform apply   -auto-approve ... -var-file=...
//! output(target, key)     terraform output  -json   (then look up `key`)
//! destroy(target)         terraform destroy -auto-approve ... -var-file=...
//! ```
//!
//! Every call blocks until the engine exits. Nothing is retried here.

pub mod diagnostics;
pub mod error;
mod process;
pub mod provisioner;
pub mod target;
pub mod terraform;

pub use diagnostics::{Diagnostic, Severity};
pub use error::{EngineFailure, Phase, ProvisioningError, ProvisioningResult};
pub use provisioner::Provisioner;
pub use target::{ProvisioningTarget, TargetBuilder};
pub use terraform::{DriverConfig, PhaseTimeouts, TerraformDriver, TERRAFORM_BIN_ENV};
