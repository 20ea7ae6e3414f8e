//! Payload validation report types.
//!
//! A `PayloadValidator` checks a message payload against a capability's
//! declared schema and returns a `ValidationReport`.

use serde::{Deserialize, Serialize};

/// The result of validating one payload against one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True only if no failures were found.
    pub passed: bool,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    /// Build a report from collected failures; passes when there are none.
    pub fn from_failures(failures: Vec<ValidationFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// All failures joined into one line for logs and error values.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.path, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A single schema violation within a `ValidationReport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// JSON pointer to the offending value (empty for the payload root).
    pub path: String,
    pub message: String,
}
