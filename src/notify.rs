//! Post-commit notification of membership changes.
//!
//! Runs on its own task after the calculation transaction has committed.
//! Failures are logged and never reach the calculation's caller; nothing is
//! retried here.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use group_rules_core::{MetadataServiceClient, OrchestrationServiceClient};

/// What a notification run did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSummary {
    pub triggered: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Trigger every `on_group_update` workflow of `group_id` in the background.
pub fn spawn_group_updated(
    metadata: Arc<dyn MetadataServiceClient>,
    orchestration: Arc<dyn OrchestrationServiceClient>,
    group_id: Uuid,
) -> JoinHandle<NotificationSummary> {
    tokio::spawn(async move { notify_group_updated(&*metadata, &*orchestration, group_id).await })
}

pub async fn notify_group_updated(
    metadata: &dyn MetadataServiceClient,
    orchestration: &dyn OrchestrationServiceClient,
    group_id: Uuid,
) -> NotificationSummary {
    let mut summary = NotificationSummary::default();

    let workflows = match metadata.list_group_update_workflows(group_id).await {
        Ok(workflows) => workflows,
        Err(e) => {
            warn!(%group_id, error = %e, "Could not list group update workflows");
            return summary;
        }
    };

    if workflows.is_empty() {
        debug!(%group_id, "No workflows listen for updates of this group");
        return summary;
    }

    for workflow_id in workflows {
        match orchestration.trigger_workflow(workflow_id).await {
            Ok(()) => summary.triggered.push(workflow_id),
            Err(e) => {
                warn!(%group_id, %workflow_id, error = %e, "Workflow trigger failed");
                summary.failed.push(workflow_id);
            }
        }
    }

    info!(
        %group_id,
        triggered = summary.triggered.len(),
        failed = summary.failed.len(),
        "Group update notification sent"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use group_rules_core::{InMemoryMetadataClient, OrchestrationError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOrchestrator {
        calls: Mutex<Vec<Uuid>>,
        reject: Vec<Uuid>,
    }

    #[async_trait]
    impl OrchestrationServiceClient for RecordingOrchestrator {
        async fn trigger_workflow(&self, workflow_id: Uuid) -> Result<(), OrchestrationError> {
            self.calls.lock().unwrap().push(workflow_id);
            if self.reject.contains(&workflow_id) {
                return Err(OrchestrationError::Rejected {
                    workflow_id,
                    message: "503 Service Unavailable".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn triggers_each_configured_workflow() {
        let group_id = Uuid::new_v4();
        let (wf1, wf2) = (Uuid::new_v4(), Uuid::new_v4());
        let metadata = Arc::new(InMemoryMetadataClient::new());
        metadata.add_group_update_workflow(group_id, wf1);
        metadata.add_group_update_workflow(group_id, wf2);
        let orchestrator = Arc::new(RecordingOrchestrator {
            reject: vec![wf1],
            ..Default::default()
        });

        let summary = spawn_group_updated(metadata, orchestrator.clone(), group_id)
            .await
            .unwrap();

        assert_eq!(summary.triggered, vec![wf2]);
        assert_eq!(summary.failed, vec![wf1]);
        assert_eq!(*orchestrator.calls.lock().unwrap(), vec![wf1, wf2]);
    }

    #[tokio::test]
    async fn no_workflows_means_no_calls() {
        let metadata = InMemoryMetadataClient::new();
        let orchestrator = RecordingOrchestrator::default();
        let summary = notify_group_updated(&metadata, &orchestrator, Uuid::new_v4()).await;
        assert_eq!(summary, NotificationSummary::default());
        assert!(orchestrator.calls.lock().unwrap().is_empty());
    }
}
