//! Error types for transformation rules
//!
//! Provides error handling for:
//! - Rule application (structural edits, synthesis)
//! - Rule registration

use splice_unit::{UnitError, UnitName};

/// Errors raised while applying a rule to one unit
///
/// These never abort a patch run; the engine logs them and leaves the unit
/// unpatched.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Unit could not be parsed, edited or serialized
    #[error("unit error: {0}")]
    Unit(#[from] UnitError),

    /// Rule-specific failure
    #[error("rule '{rule}' failed: {message}")]
    Failed { rule: String, message: String },
}

impl RuleError {
    /// Create a rule-specific failure
    pub fn failed(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Errors during rule registration
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Unit already has a rule
    #[error("unit '{target}' already has rule '{existing}'")]
    Duplicate { target: UnitName, existing: String },
}
