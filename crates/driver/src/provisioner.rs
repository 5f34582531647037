//! The capability the lifecycle harness drives

use crate::error::ProvisioningResult;
use crate::target::ProvisioningTarget;

/// Blocking interface to a provisioning engine.
///
/// Every call mutates real backend state and returns only once the engine
/// has finished. Implementations never retry on their own.
pub trait Provisioner: Send + Sync {
    /// Prepare working state for `target`. Re-running is not an error.
    fn initialize(&self, target: &ProvisioningTarget) -> ProvisioningResult<()>;

    /// Provision everything `target` declares
    fn apply(&self, target: &ProvisioningTarget) -> ProvisioningResult<()>;

    /// Read one named output from the engine's current state.
    ///
    /// A key absent from state is [`ProvisioningError::OutputNotFound`],
    /// never an apply failure.
    ///
    /// [`ProvisioningError::OutputNotFound`]: crate::ProvisioningError::OutputNotFound
    fn output(&self, target: &ProvisioningTarget, key: &str) -> ProvisioningResult<String>;

    /// Remove everything provisioned for `target`. Must tolerate a target
    /// whose apply failed part way or never ran.
    fn destroy(&self, target: &ProvisioningTarget) -> ProvisioningResult<()>;
}
