//! Outbound lookup initiator (payer side)

use super::state::{LookupState, LookupTracker};
use crate::directory::ParticipantDirectory;
use crate::error::LookupResult;
use crate::party::headers::OutboundHeaders;
use crate::party::{PartyIdentifier, TraceContext, TransactionChannelRequest};
use crate::switch::{OutboundRequest, PartiesResource, SwitchAddress, SwitchTransport};

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One outbound resolution request
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    pub identifier: PartyIdentifier,
    pub headers: OutboundHeaders,
}

impl LookupRequest {
    fn into_outbound(self, address: &SwitchAddress) -> OutboundRequest {
        OutboundRequest {
            method: Method::GET,
            url: address.parties(&self.identifier, PartiesResource::Party),
            headers: self.headers,
            body: None,
        }
    }
}

/// Sends `GET /parties/{type}/{value}` to the switch for a channel transaction
pub struct LookupInitiator {
    directory: Arc<dyn ParticipantDirectory>,
    transport: Arc<dyn SwitchTransport>,
    address: SwitchAddress,
    tracker: Arc<LookupTracker>,
}

impl LookupInitiator {
    pub fn new(
        directory: Arc<dyn ParticipantDirectory>,
        transport: Arc<dyn SwitchTransport>,
        address: SwitchAddress,
        tracker: Arc<LookupTracker>,
    ) -> Self {
        Self {
            directory,
            transport,
            address,
            tracker,
        }
    }

    /// Initiate a lookup for the payee of `request`.
    ///
    /// The transaction context must already be cached under the payee
    /// identifier. Nothing is sent if the request is malformed or the payer's
    /// participant is unknown.
    pub async fn initiate(
        &self,
        request: &TransactionChannelRequest,
        trace: Option<&TraceContext>,
    ) -> LookupResult<PartyIdentifier> {
        let payee = request.payee_identifier()?;
        let payer = request.payer_identifier()?;

        let payer_participant = self
            .directory
            .resolve_participant(payer.id_type, &payer.id_value)
            .await?;

        let trace = TraceContext::continue_or_generate(trace);
        let lookup = LookupRequest {
            identifier: payee.clone(),
            headers: OutboundHeaders::party_request(&payer_participant.fsp_id, &trace),
        };

        if let Some(previous) = self.tracker.begin(&payee) {
            warn!(
                "Concurrent lookup for {} (previous lookup {}); callbacks will correlate to the latest context",
                payee, previous
            );
        }

        info!(
            "PAYER -> SWITCH party lookup for {} from {} (trace {})",
            payee, payer_participant.fsp_id, trace.trace_id
        );

        if let Err(e) = self.transport.send(lookup.into_outbound(&self.address)).await {
            error!(
                "Party lookup for {} was not delivered (retryable: {}): {}",
                payee,
                e.is_retryable(),
                e
            );
            self.tracker.forget(&payee);
            return Err(e);
        }

        // The callback may already have been correlated while the send was in flight
        if let Err(e) = self.tracker.advance(&payee, LookupState::AwaitingCallback) {
            debug!("Lookup state for {} not advanced: {}", payee, e);
        }
        crate::metrics::record_lookup_initiated(payee.id_type);
        Ok(payee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MockParticipantDirectory, Participant};
    use crate::error::LookupError;
    use crate::party::headers::{FSPIOP_SOURCE, TRACEPARENT};
    use crate::party::{OutcomeKind, PartyIdType};
    use crate::switch::transport::MockSwitchTransport;
    use serde_json::json;

    fn channel_request() -> TransactionChannelRequest {
        serde_json::from_value(json!({
            "payer": {
                "partyIdInfo": { "partyIdType": "MSISDN", "partyIdentifier": "254711111111" }
            },
            "payee": {
                "partyIdInfo": { "partyIdType": "MSISDN", "partyIdentifier": "254700000001" }
            },
            "amount": { "amount": "100", "currency": "KES" }
        }))
        .unwrap()
    }

    fn payer_directory() -> MockParticipantDirectory {
        let mut directory = MockParticipantDirectory::new();
        directory
            .expect_resolve_participant()
            .withf(|id_type, id_value| *id_type == PartyIdType::Msisdn && id_value == "254711111111")
            .returning(|_, _| {
                Ok(Participant {
                    tenant_id: "tn01".to_string(),
                    fsp_id: "payerfsp".to_string(),
                })
            });
        directory
    }

    fn initiator(
        directory: MockParticipantDirectory,
        transport: MockSwitchTransport,
        tracker: Arc<LookupTracker>,
    ) -> LookupInitiator {
        LookupInitiator::new(
            Arc::new(directory),
            Arc::new(transport),
            SwitchAddress::new("http://switch.local:4002").unwrap(),
            tracker,
        )
    }

    #[tokio::test]
    async fn test_sends_get_addressed_by_payee_with_payer_source() {
        let inbound = TraceContext::generate();
        let trace_id = inbound.trace_id.clone();

        let mut transport = MockSwitchTransport::new();
        transport
            .expect_send()
            .withf(move |req| {
                req.method == Method::GET
                    && req.url.as_str() == "http://switch.local:4002/parties/MSISDN/254700000001"
                    && req.headers.get(FSPIOP_SOURCE) == Some("payerfsp")
                    && req
                        .headers
                        .get(TRACEPARENT)
                        .map(|t| t.contains(&trace_id))
                        .unwrap_or(false)
                    && req.body.is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        let tracker = Arc::new(LookupTracker::new());
        let initiator = initiator(payer_directory(), transport, tracker.clone());

        let payee = initiator
            .initiate(&channel_request(), Some(&inbound))
            .await
            .unwrap();
        assert_eq!(payee.id_value, "254700000001");
        assert_eq!(tracker.state(&payee), Some(LookupState::AwaitingCallback));
    }

    #[tokio::test]
    async fn test_missing_payee_is_rejected_without_network_call() {
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(0);
        let mut directory = MockParticipantDirectory::new();
        directory.expect_resolve_participant().times(0);

        let mut request = channel_request();
        request.payee = None;

        let err = initiator(directory, transport, Arc::new(LookupTracker::new()))
            .initiate(&request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_payer_is_directory_error() {
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(0);
        let mut directory = MockParticipantDirectory::new();
        directory.expect_resolve_participant().returning(|id_type, id_value| {
            Err(LookupError::DirectoryResolution {
                id_type: id_type.to_string(),
                id_value: id_value.to_string(),
            })
        });

        let err = initiator(directory, transport, Arc::new(LookupTracker::new()))
            .initiate(&channel_request(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::DirectoryResolution { .. }));
    }

    #[tokio::test]
    async fn test_callback_overtaking_send_still_succeeds() {
        let tracker = Arc::new(LookupTracker::new());
        let overtaken = tracker.clone();

        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(1).returning(move |_| {
            let payee = PartyIdentifier::new(PartyIdType::Msisdn, "254700000001");
            overtaken
                .advance(&payee, LookupState::Correlated(OutcomeKind::Success))
                .unwrap();
            Ok(())
        });

        let payee = initiator(payer_directory(), transport, tracker.clone())
            .initiate(&channel_request(), None)
            .await
            .unwrap();

        assert_eq!(
            tracker.state(&payee),
            Some(LookupState::Correlated(OutcomeKind::Success))
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_is_surfaced_and_untracked() {
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(1).returning(|req| {
            Err(LookupError::NetworkDelivery {
                url: req.url.to_string(),
                message: "connection refused".to_string(),
            })
        });

        let tracker = Arc::new(LookupTracker::new());
        let err = initiator(payer_directory(), transport, tracker.clone())
            .initiate(&channel_request(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::NetworkDelivery { .. }));
        let payee = PartyIdentifier::new(PartyIdType::Msisdn, "254700000001");
        assert!(tracker.state(&payee).is_none());
    }
}
