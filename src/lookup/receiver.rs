//! Inbound lookup receiver (payee side)

use crate::directory::ParticipantDirectory;
use crate::error::{LookupError, LookupResult};
use crate::party::headers::{DATE, FSPIOP_SOURCE, TRACEPARENT};
use crate::party::{PartyIdentifier, ProtocolHeaders};
use crate::workflow::{variables, WorkflowEngine, WorkflowVariables};

use std::sync::Arc;
use tracing::{info, warn};

/// Hands `GET /parties/{type}/{value}` from the switch to the workflow engine
pub struct LookupReceiver {
    directory: Arc<dyn ParticipantDirectory>,
    workflow: Arc<dyn WorkflowEngine>,
    flow_name: String,
}

impl LookupReceiver {
    pub fn new(
        directory: Arc<dyn ParticipantDirectory>,
        workflow: Arc<dyn WorkflowEngine>,
        flow_name: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            workflow,
            flow_name: flow_name.into(),
        }
    }

    /// Start the party lookup flow for `identifier`; returns the instance id.
    ///
    /// Fails with `TenantResolution` and starts nothing if no tenant owns the
    /// identifier. The answer leaves later through the response dispatcher.
    pub async fn receive(
        &self,
        identifier: &PartyIdentifier,
        headers: &ProtocolHeaders,
    ) -> LookupResult<String> {
        info!(
            "SWITCH -> PAYEE inbound party lookup for {} from {}",
            identifier,
            headers.source.as_deref().unwrap_or("<unknown>")
        );
        crate::metrics::record_inbound_lookup(identifier.id_type);

        let participant = self
            .directory
            .resolve_participant(identifier.id_type, &identifier.id_value)
            .await
            .map_err(|e| match e {
                LookupError::DirectoryResolution { id_type, id_value } => {
                    warn!("No tenant owns {}/{}", id_type, id_value);
                    LookupError::TenantResolution { id_type, id_value }
                }
                other => other,
            })?;

        let variables = Self::workflow_variables(identifier, headers, &participant.tenant_id);
        let instance_id = self.workflow.start(&self.flow_name, variables).await?;

        info!(
            "Started {} for {} on tenant {} ({})",
            self.flow_name, identifier, participant.tenant_id, instance_id
        );
        Ok(instance_id)
    }

    fn workflow_variables(
        identifier: &PartyIdentifier,
        headers: &ProtocolHeaders,
        tenant_id: &str,
    ) -> WorkflowVariables {
        let mut vars = WorkflowVariables::new();
        vars.insert(
            variables::PARTY_ID_TYPE.to_string(),
            identifier.id_type.as_str().into(),
        );
        vars.insert(
            variables::PARTY_ID.to_string(),
            identifier.id_value.clone().into(),
        );

        let copied = [
            (FSPIOP_SOURCE, &headers.source),
            (TRACEPARENT, &headers.traceparent),
            (DATE, &headers.date),
        ];
        for (name, value) in copied {
            if let Some(value) = value {
                vars.insert(name.to_string(), value.clone().into());
            }
        }

        vars.insert(variables::TENANT_ID.to_string(), tenant_id.into());
        vars
    }
}
