//! Boundary validation for rule records.
//!
//! The engine assumes rules passed this check; it is run by rule sources
//! before a list is handed to the registry.

use super::types::{Action, Rule};
use thiserror::Error;

/// Reasons a rule record is rejected at the boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule must have a valid name")]
    MissingName,

    #[error("rule '{0}' must have an id")]
    MissingId(String),

    #[error("rule '{0}': URL matcher must have a non-empty value")]
    EmptyUrlValue(String),

    #[error("rule '{0}': status action requires a statusCode")]
    MissingStatusCode(String),

    #[error("rule '{rule}': statusCode {status} is outside 100..=999")]
    InvalidStatusCode { rule: String, status: u16 },

    #[error("rule '{0}': patch action must have a non-empty patches array")]
    EmptyPatches(String),

    #[error("rule '{rule}': patch #{index} has an empty path")]
    EmptyPatchPath { rule: String, index: usize },

    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),
}

impl Rule {
    /// Check the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::MissingName);
        }
        if self.id.trim().is_empty() {
            return Err(RuleError::MissingId(self.name.clone()));
        }

        if let Some(url) = &self.matcher.url {
            if url.value.is_empty() {
                return Err(RuleError::EmptyUrlValue(self.name.clone()));
            }
        }

        match &self.action {
            Action::Status(action) => {
                let status = action
                    .status_code
                    .ok_or_else(|| RuleError::MissingStatusCode(self.name.clone()))?;
                self.check_status(status)?;
            }
            Action::Replace(action) => {
                if let Some(status) = action.status_code {
                    self.check_status(status)?;
                }
            }
            Action::Patch(action) => {
                if action.patches.is_empty() {
                    return Err(RuleError::EmptyPatches(self.name.clone()));
                }
                if let Some(index) = action.patches.iter().position(|p| p.path.is_empty()) {
                    return Err(RuleError::EmptyPatchPath {
                        rule: self.name.clone(),
                        index,
                    });
                }
                if let Some(status) = action.status_code {
                    self.check_status(status)?;
                }
            }
            // u64 already enforces delay >= 0
            Action::Delay(_) => {}
        }

        Ok(())
    }

    fn check_status(&self, status: u16) -> Result<(), RuleError> {
        if (100..=999).contains(&status) {
            Ok(())
        } else {
            Err(RuleError::InvalidStatusCode {
                rule: self.name.clone(),
                status,
            })
        }
    }
}

/// Validate every rule and the store-wide id uniqueness invariant.
pub fn validate_rules(rules: &[Rule]) -> Result<(), RuleError> {
    let mut seen = std::collections::HashSet::with_capacity(rules.len());
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleError::DuplicateId(rule.id.clone()));
        }
    }
    Ok(())
}
