//! Workflow engine hand-off
//!
//! The relayer never drives the transaction workflow itself. It starts a flow
//! when an inbound lookup arrives and publishes a message when a callback is
//! correlated. Both are enqueued on a channel and executed by a background
//! worker, so callers never wait on the engine.

pub mod client;

pub use client::{WorkflowGateway, WorkflowWorker};

use crate::error::{LookupError, LookupResult};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Variables handed to the workflow engine
pub type WorkflowVariables = serde_json::Map<String, serde_json::Value>;

/// Variable names shared with the workflow definitions
pub mod variables {
    pub const PARTY_ID_TYPE: &str = "partyIdType";
    pub const PARTY_ID: &str = "partyId";
    pub const TENANT_ID: &str = "tenantId";
    pub const TRANSACTION_ID: &str = "transactionId";
    pub const PARTY_LOOKUP_FAILED: &str = "partyLookupFailed";
    pub const PAYEE_PARTY_RESPONSE: &str = "payeePartyResponse";
    pub const ERROR_INFORMATION: &str = "errorInformation";
    pub const LOOKUP_INSTANCE_ID: &str = "lookupInstanceId";
}

/// Port for the external workflow engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a new instance of `flow_name`; returns the instance id
    async fn start(&self, flow_name: &str, variables: WorkflowVariables) -> LookupResult<String>;

    /// Resume instances waiting on `name` for `correlation_key`
    async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: WorkflowVariables,
    ) -> LookupResult<()>;
}

/// Command executed by the workflow worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowCommand {
    Start {
        instance_id: String,
        flow_name: String,
        variables: WorkflowVariables,
    },
    Publish {
        name: String,
        correlation_key: String,
        variables: WorkflowVariables,
    },
}

impl WorkflowCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowCommand::Start { .. } => "start",
            WorkflowCommand::Publish { .. } => "publish",
        }
    }
}

/// Engine adapter that only enqueues commands
pub struct QueuedWorkflowEngine {
    tx: mpsc::Sender<WorkflowCommand>,
}

impl QueuedWorkflowEngine {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WorkflowCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn enqueue(&self, command: WorkflowCommand) -> LookupResult<()> {
        let kind = command.kind();
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                LookupError::Workflow(format!("workflow queue full, dropping {}", kind))
            }
            TrySendError::Closed(_) => {
                LookupError::Workflow("workflow worker has stopped".to_string())
            }
        })
    }
}

#[async_trait]
impl WorkflowEngine for QueuedWorkflowEngine {
    async fn start(&self, flow_name: &str, mut variables: WorkflowVariables) -> LookupResult<String> {
        let instance_id = Uuid::new_v4().to_string();
        variables.insert(
            variables::LOOKUP_INSTANCE_ID.to_string(),
            instance_id.clone().into(),
        );
        self.enqueue(WorkflowCommand::Start {
            instance_id: instance_id.clone(),
            flow_name: flow_name.to_string(),
            variables,
        })?;
        debug!("Queued start of {} as {}", flow_name, instance_id);
        Ok(instance_id)
    }

    async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: WorkflowVariables,
    ) -> LookupResult<()> {
        self.enqueue(WorkflowCommand::Publish {
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            variables,
        })?;
        debug!("Queued message {} for {}", name, correlation_key);
        Ok(())
    }
}
