//! Group calculation status types — pure value types, no DB dependency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the most recent calculation of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationStatus {
    Calculating,
    Completed,
    Failed,
}

impl CalculationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculating => "CALCULATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CalculationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALCULATING" => Ok(Self::Calculating),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown calculation status: {}", s)),
        }
    }
}

/// The single log row kept per group, overwritten by every calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCalculationLog {
    pub group_definition_id: Uuid,
    pub entity_definition_id: Uuid,
    pub calculated_at: DateTime<Utc>,
    pub member_count: i64,
    pub status: CalculationStatus,
    pub error_message: Option<String>,
}

impl GroupCalculationLog {
    pub fn calculating(group_definition_id: Uuid, entity_definition_id: Uuid) -> Self {
        Self {
            group_definition_id,
            entity_definition_id,
            calculated_at: Utc::now(),
            member_count: 0,
            status: CalculationStatus::Calculating,
            error_message: None,
        }
    }

    pub fn completed(group_definition_id: Uuid, entity_definition_id: Uuid, member_count: usize) -> Self {
        Self {
            member_count: member_count as i64,
            status: CalculationStatus::Completed,
            ..Self::calculating(group_definition_id, entity_definition_id)
        }
    }

    pub fn failed(
        group_definition_id: Uuid,
        entity_definition_id: Uuid,
        member_count: usize,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            member_count: member_count as i64,
            status: CalculationStatus::Failed,
            error_message: Some(error_message.into()),
            ..Self::calculating(group_definition_id, entity_definition_id)
        }
    }
}

/// Current membership snapshot of a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResults {
    pub member_ids: Vec<Uuid>,
    /// `None` when the group has never been calculated.
    pub calculated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            CalculationStatus::Calculating,
            CalculationStatus::Completed,
            CalculationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CalculationStatus>(), Ok(status));
        }
        assert!("completed".parse::<CalculationStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!CalculationStatus::Calculating.is_terminal());
        assert!(CalculationStatus::Completed.is_terminal());
        assert!(CalculationStatus::Failed.is_terminal());
    }

    #[test]
    fn failed_log_keeps_message_and_count() {
        let log = GroupCalculationLog::failed(Uuid::new_v4(), Uuid::new_v4(), 12, "boom");
        assert_eq!(log.status, CalculationStatus::Failed);
        assert_eq!(log.member_count, 12);
        assert_eq!(log.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn calculating_log_starts_empty() {
        let log = GroupCalculationLog::calculating(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(log.member_count, 0);
        assert!(log.error_message.is_none());
    }
}
