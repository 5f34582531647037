//! InfraCheck lifecycle harness
//!
//! Drives a [`Provisioner`](infracheck_driver::Provisioner) through one
//! apply → validate → destroy cycle and reports the outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LifecycleRun                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  new(name, provisioner, target)    teardown armed           │
//! │    ├── provision()     initialize + apply   → Applied       │
//! │    ├── validate(key)   output + expectation → Validated     │
//! │    └── finish()        destroy (exactly once) → RunReport   │
//! │  Drop                  destroy if finish() never ran        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LifecycleSpec (YAML)                                       │
//! │    ├── name, dir, var_files, vars, env                      │
//! │    ├── output, expect { non_empty | equals | matches }      │
//! │    └── timeouts { init_secs, apply_secs, ... }              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod expect;
pub mod report;
pub mod run;
pub mod spec;
pub mod state;
pub mod testing;

pub use error::{AssertionFailure, HarnessError, HarnessResult, LifecycleError};
pub use expect::{OutputBinding, OutputExpectation};
pub use report::{FailureReport, PhaseTimings, RunFailure, RunReport, SuiteReport};
pub use run::{run_lifecycle, LifecycleRun};
pub use spec::{LifecycleSpec, TimeoutSpec};
pub use state::RunState;
