//! Lifecycle run state machine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Completion state of a lifecycle run.
///
/// ```text
/// Pending ──► Applied ──► Validated ──► Destroyed
///    │           │            │
///    └───────────┴────────────┴──────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Applied,
    Validated,
    Destroyed,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Applied)
                | (Applied, Validated)
                | (Validated, Destroyed)
                | (Pending | Applied | Validated, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Destroyed | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Applied => "applied",
            RunState::Validated => "validated",
            RunState::Destroyed => "destroyed",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(RunState::Pending, RunState::Applied, true)]
    #[test_case(RunState::Applied, RunState::Validated, true)]
    #[test_case(RunState::Validated, RunState::Destroyed, true)]
    #[test_case(RunState::Applied, RunState::Failed, true)]
    #[test_case(RunState::Pending, RunState::Validated, false ; "cannot skip apply")]
    #[test_case(RunState::Applied, RunState::Destroyed, false ; "cannot skip validation")]
    #[test_case(RunState::Destroyed, RunState::Failed, false ; "destroyed is terminal")]
    #[test_case(RunState::Failed, RunState::Destroyed, false ; "failed is terminal")]
    fn test_transitions(from: RunState, to: RunState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Destroyed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Validated.is_terminal());
    }
}
