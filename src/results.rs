//! Reading a group's current membership.

use tracing::debug;
use uuid::Uuid;

use group_rules_core::{CalculationStatus, GroupCalculationLog, GroupResults};

use crate::database::CalculationRepository;
use crate::error::{GroupEngineError, Result};

#[derive(Clone)]
pub struct GroupResultsReader {
    repository: CalculationRepository,
}

impl GroupResultsReader {
    pub fn new(repository: CalculationRepository) -> Self {
        Self { repository }
    }

    /// Current membership of `group_id`.
    ///
    /// A group that was never calculated yields empty results with no
    /// timestamp. If the last calculation did not complete, the error carries
    /// its status, timestamp and message instead of an empty member list.
    pub async fn get_group_results(&self, group_id: Uuid) -> Result<GroupResults> {
        let log = self.repository.latest_log(group_id).await?;
        let member_ids = match &log {
            Some(log) if log.status == CalculationStatus::Completed => {
                self.repository.member_ids(group_id).await?
            }
            _ => Vec::new(),
        };
        let results = results_from_log(group_id, log, member_ids)?;
        debug!(%group_id, members = results.member_ids.len(), "Read group results");
        Ok(results)
    }
}

fn results_from_log(
    group_id: Uuid,
    log: Option<GroupCalculationLog>,
    member_ids: Vec<Uuid>,
) -> Result<GroupResults> {
    let Some(log) = log else {
        return Ok(GroupResults::default());
    };

    if log.status != CalculationStatus::Completed {
        return Err(GroupEngineError::CalculationNotSuccessful {
            group_id,
            status: log.status,
            calculated_at: log.calculated_at,
            error_message: log.error_message,
        });
    }

    Ok(GroupResults {
        member_ids,
        calculated_at: Some(log.calculated_at),
    })
}
