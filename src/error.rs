//! Error types for group calculation and results reading.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use group_rules_core::{CalculationStatus, MetadataError, RuleError};

pub type Result<T> = std::result::Result<T, GroupEngineError>;

#[derive(Debug, Error)]
pub enum GroupEngineError {
    #[error("group definition not found: {0}")]
    GroupNotFound(Uuid),

    #[error("metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(
        "last calculation for group {group_id} was not successful (status: {status}){}",
        message_suffix(.error_message)
    )]
    CalculationNotSuccessful {
        group_id: Uuid,
        status: CalculationStatus,
        calculated_at: DateTime<Utc>,
        error_message: Option<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

impl GroupEngineError {
    /// Whether the error was raised before any SQL ran (bad or missing
    /// definitions rather than a database failure).
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::GroupNotFound(_) | Self::Metadata(_) | Self::Rule(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_successful_names_status_and_message() {
        let e = GroupEngineError::CalculationNotSuccessful {
            group_id: Uuid::nil(),
            status: CalculationStatus::Failed,
            calculated_at: Utc::now(),
            error_message: Some("unsupported operator 'between'".into()),
        };
        assert_eq!(
            e.to_string(),
            "last calculation for group 00000000-0000-0000-0000-000000000000 was not successful \
             (status: FAILED): unsupported operator 'between'"
        );
    }

    #[test]
    fn not_successful_without_message() {
        let e = GroupEngineError::CalculationNotSuccessful {
            group_id: Uuid::nil(),
            status: CalculationStatus::Calculating,
            calculated_at: Utc::now(),
            error_message: None,
        };
        assert!(e.to_string().ends_with("(status: CALCULATING)"));
    }

    #[test]
    fn definition_error_classification() {
        assert!(GroupEngineError::GroupNotFound(Uuid::nil()).is_definition_error());
        assert!(GroupEngineError::Rule(RuleError::MissingRuleType).is_definition_error());
        assert!(!GroupEngineError::Database(sqlx::Error::RowNotFound).is_definition_error());
    }
}
