//! Workflow gateway client and queue worker
//!
//! Speaks the Camunda 8 REST gateway: process instance creation and message
//! publication.

use super::{WorkflowCommand, WorkflowVariables};
use crate::error::{LookupError, LookupResult};

use reqwest::{Client, Url};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// HTTP client for the workflow gateway
pub struct WorkflowGateway {
    client: Client,
    base: Url,
}

impl WorkflowGateway {
    pub fn new(base_url: &str, timeout: Duration) -> LookupResult<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            LookupError::Config(format!("Invalid workflow gateway url {}: {}", base_url, e))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> LookupResult<Url> {
        self.base
            .join(path)
            .map_err(|e| LookupError::Workflow(format!("Invalid gateway path {}: {}", path, e)))
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> LookupResult<()> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url.clone()).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(LookupError::Workflow(format!(
                "{} returned {}: {}",
                url, status, text
            )))
        }
    }

    pub async fn create_instance(
        &self,
        flow_name: &str,
        variables: &WorkflowVariables,
    ) -> LookupResult<()> {
        self.post(
            "v2/process-instances",
            json!({
                "processDefinitionId": flow_name,
                "variables": variables,
            }),
        )
        .await
    }

    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: &WorkflowVariables,
    ) -> LookupResult<()> {
        self.post(
            "v2/messages/publication",
            json!({
                "name": name,
                "correlationKey": correlation_key,
                "variables": variables,
            }),
        )
        .await
    }
}

/// Drains the workflow command queue
pub struct WorkflowWorker {
    rx: mpsc::Receiver<WorkflowCommand>,
    gateway: Option<WorkflowGateway>,
}

impl WorkflowWorker {
    pub fn new(rx: mpsc::Receiver<WorkflowCommand>, gateway: Option<WorkflowGateway>) -> Self {
        Self { rx, gateway }
    }

    /// Run until every engine handle is dropped
    pub async fn run(mut self) -> LookupResult<()> {
        if self.gateway.is_none() {
            info!("No workflow gateway configured - commands will be logged only");
        }

        while let Some(command) = self.rx.recv().await {
            let kind = command.kind();
            match self.execute(&command).await {
                Ok(()) => crate::metrics::record_workflow_command(kind, true),
                Err(e) => {
                    error!("Workflow {} failed: {}", kind, e);
                    crate::metrics::record_workflow_command(kind, false);
                }
            }
        }

        info!("Workflow worker stopped");
        Ok(())
    }

    async fn execute(&self, command: &WorkflowCommand) -> LookupResult<()> {
        let Some(gateway) = &self.gateway else {
            debug!("Workflow command (dry run): {:?}", command);
            return Ok(());
        };

        match command {
            WorkflowCommand::Start {
                instance_id,
                flow_name,
                variables,
            } => {
                gateway.create_instance(flow_name, variables).await?;
                info!("Started {} ({})", flow_name, instance_id);
            }
            WorkflowCommand::Publish {
                name,
                correlation_key,
                variables,
            } => {
                gateway.publish_message(name, correlation_key, variables).await?;
                info!("Published {} for {}", name, correlation_key);
            }
        }
        Ok(())
    }
}
