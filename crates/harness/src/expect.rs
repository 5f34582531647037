//! Output bindings and the shape checks applied to them

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AssertionFailure;

/// A named output as the engine reported it after apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub key: String,
    pub value: String,
}

/// Expected shape of a provisioned output value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputExpectation {
    /// Value contains something other than whitespace
    #[default]
    NonEmpty,

    /// Value equals `value` exactly
    Equals { value: String },

    /// Value matches the regular expression `pattern`
    Matches { pattern: String },
}

impl OutputExpectation {
    /// Reject expectations that can never be checked
    pub fn validate(&self) -> Result<(), String> {
        match self {
            OutputExpectation::Matches { pattern } => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid output pattern /{pattern}/: {e}")),
            _ => Ok(()),
        }
    }

    pub fn check(&self, binding: &OutputBinding) -> Result<(), AssertionFailure> {
        let holds = match self {
            OutputExpectation::NonEmpty => !binding.value.trim().is_empty(),
            OutputExpectation::Equals { value } => &binding.value == value,
            OutputExpectation::Matches { pattern } => match Regex::new(pattern) {
                Ok(re) => re.is_match(&binding.value),
                Err(e) => {
                    return Err(AssertionFailure {
                        key: binding.key.clone(),
                        expected: format!("{self} (pattern does not compile: {e})"),
                        actual: binding.value.clone(),
                    })
                }
            },
        };

        if holds {
            Ok(())
        } else {
            Err(AssertionFailure {
                key: binding.key.clone(),
                expected: self.to_string(),
                actual: binding.value.clone(),
            })
        }
    }
}

impl fmt::Display for OutputExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputExpectation::NonEmpty => f.write_str("non-empty"),
            OutputExpectation::Equals { value } => write!(f, "equal to {value:?}"),
            OutputExpectation::Matches { pattern } => write!(f, "matching /{pattern}/"),
        }
    }
}
