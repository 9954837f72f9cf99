//! HTTP client for the workflow orchestration service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use group_rules_core::{OrchestrationError, OrchestrationServiceClient};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpOrchestrationClient {
    client: Client,
    base_url: String,
}

impl HttpOrchestrationClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build orchestration HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn trigger_url(&self, workflow_id: Uuid) -> String {
        format!("{}/api/v1/workflows/{}/trigger", self.base_url, workflow_id)
    }
}

#[async_trait]
impl OrchestrationServiceClient for HttpOrchestrationClient {
    async fn trigger_workflow(&self, workflow_id: Uuid) -> Result<(), OrchestrationError> {
        let url = self.trigger_url(workflow_id);
        debug!(%workflow_id, %url, "Triggering workflow");

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(OrchestrationError::Rejected {
            workflow_id,
            message: format!("{}: {}", status, body),
        })
    }
}
