use serde::Serialize;

use crate::errors::ClientError;
use crate::models::Preferences;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<(), ClientError> {
        if self.passed {
            return Ok(());
        }
        let message = self
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ClientError::Validation(message))
    }
}

/// Checks a preferences value before it may be committed or searched with.
///
/// FAIL conditions:
/// - `salary_min` greater than `salary_max` (when both are set)
/// - neither target roles nor skills given
pub fn validate_preferences(preferences: &Preferences) -> ValidationReport {
    let mut issues = Vec::new();

    if let (Some(min), Some(max)) = (preferences.salary_min, preferences.salary_max) {
        if min > max {
            issues.push(ValidationIssue {
                field: "salary_min",
                message: format!("minimum salary {min} exceeds maximum {max}"),
            });
        }
    }

    if !preferences.has_criteria() {
        issues.push(ValidationIssue {
            field: "target_roles",
            message: "add at least one target role or skill".to_string(),
        });
    }

    ValidationReport {
        passed: issues.is_empty(),
        issues,
    }
}
