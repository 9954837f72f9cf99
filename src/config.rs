//! Engine configuration read from the environment.

use std::time::Duration;

use crate::database::DatabaseConfig;
use crate::error::{GroupEngineError, Result};

/// Where post-commit notifications go.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Knobs for a single calculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculationOptions {
    /// Take `pg_advisory_xact_lock` on the group id before recomputing, so
    /// concurrent calculations of one group run one after another.
    pub advisory_lock: bool,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    /// `None` disables post-commit notification.
    pub orchestration: Option<OrchestrationConfig>,
    pub calculation: CalculationOptions,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut database = DatabaseConfig::default();
        if let Some(url) = lookup("DATABASE_URL") {
            database.database_url = url;
        }
        if let Some(size) = lookup("DATABASE_POOL_SIZE") {
            database.max_connections = size.parse().map_err(|_| {
                GroupEngineError::Config(format!("DATABASE_POOL_SIZE is not a number: {}", size))
            })?;
        }

        let timeout_secs = match lookup("ORCHESTRATION_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                GroupEngineError::Config(format!(
                    "ORCHESTRATION_TIMEOUT_SECS is not a number: {}",
                    raw
                ))
            })?,
            None => 10,
        };
        let orchestration = lookup("ORCHESTRATION_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|base_url| OrchestrationConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            });

        let advisory_lock = match lookup("GROUP_CALC_ADVISORY_LOCK") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                GroupEngineError::Config(format!("GROUP_CALC_ADVISORY_LOCK is not a boolean: {}", raw))
            })?,
            None => false,
        };

        Ok(Self {
            database,
            orchestration,
            calculation: CalculationOptions { advisory_lock },
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<EngineConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn orchestration_is_optional() {
        let cfg = config(&[("DATABASE_URL", "postgresql://db/groups")]).unwrap();
        assert_eq!(cfg.database.database_url, "postgresql://db/groups");
        assert!(cfg.orchestration.is_none());
        assert!(!cfg.calculation.advisory_lock);
    }

    #[test]
    fn reads_orchestration_and_lock() {
        let cfg = config(&[
            ("ORCHESTRATION_URL", "http://orchestrator:8080"),
            ("ORCHESTRATION_TIMEOUT_SECS", "3"),
            ("GROUP_CALC_ADVISORY_LOCK", "true"),
            ("DATABASE_POOL_SIZE", "4"),
        ])
        .unwrap();
        let orchestration = cfg.orchestration.unwrap();
        assert_eq!(orchestration.base_url, "http://orchestrator:8080");
        assert_eq!(orchestration.timeout, Duration::from_secs(3));
        assert!(cfg.calculation.advisory_lock);
        assert_eq!(cfg.database.max_connections, 4);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            config(&[("GROUP_CALC_ADVISORY_LOCK", "maybe")]),
            Err(GroupEngineError::Config(_))
        ));
        assert!(matches!(
            config(&[("ORCHESTRATION_TIMEOUT_SECS", "soon")]),
            Err(GroupEngineError::Config(_))
        ));
    }
}
