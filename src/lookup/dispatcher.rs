//! Response dispatcher
//!
//! Sends the final outcome of a lookup back to the switch. Success and error
//! responses share addressing and header construction and differ only in the
//! resource suffix and the body envelope.

use super::correlator::{CorrelatedLookup, OutcomeSink};
use super::state::{LookupState, LookupTracker};
use crate::error::{LookupError, LookupResult};
use crate::party::headers::OutboundHeaders;
use crate::party::{
    ErrorInformation, ErrorInformationResponse, LookupOutcome, OutcomeKind, PartyDetails,
    PartyIdentifier, PartySwitchResponse, TraceContext,
};
use crate::switch::{OutboundRequest, PartiesResource, SwitchAddress, SwitchTransport};
use crate::workflow::{variables, WorkflowEngine, WorkflowVariables};

use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Who a response is from and to
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRoute {
    pub source: String,
    pub destination: String,
    pub trace: TraceContext,
}

impl ResponseRoute {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, trace: TraceContext) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            trace,
        }
    }

    /// Route answering the peer that sent a correlated callback
    pub fn for_callback(event: &CorrelatedLookup) -> LookupResult<Self> {
        let destination = event.headers.source.clone().ok_or_else(|| {
            LookupError::MalformedRequest(format!(
                "callback for {} has no FSPIOP-Source",
                event.identifier
            ))
        })?;
        Ok(Self::new(
            event.context.source_participant_id.clone(),
            destination,
            TraceContext::continue_or_generate(event.headers.trace_context().as_ref()),
        ))
    }
}

/// Answer the payee-side workflow produced for an inbound lookup
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowAnswer {
    pub identifier: PartyIdentifier,
    /// FSP that asked; the response goes back to it
    pub requester: String,
    /// `traceparent` of the inbound lookup, as stored by the workflow
    pub traceparent: Option<String>,
    pub outcome: LookupOutcome,
}

pub struct ResponseDispatcher {
    transport: Arc<dyn SwitchTransport>,
    address: SwitchAddress,
    workflow: Arc<dyn WorkflowEngine>,
    response_message: String,
    tracker: Arc<LookupTracker>,
}

impl ResponseDispatcher {
    pub fn new(
        transport: Arc<dyn SwitchTransport>,
        address: SwitchAddress,
        workflow: Arc<dyn WorkflowEngine>,
        response_message: impl Into<String>,
        tracker: Arc<LookupTracker>,
    ) -> Self {
        Self {
            transport,
            address,
            workflow,
            response_message: response_message.into(),
            tracker,
        }
    }

    /// `PUT /parties/{type}/{value}` with the resolved party.
    ///
    /// Addressed by the identifier inside `party`.
    pub async fn dispatch_success(
        &self,
        party: &PartyDetails,
        route: &ResponseRoute,
    ) -> LookupResult<()> {
        let body = serde_json::to_value(PartySwitchResponse {
            party: party.clone(),
        })?;
        self.send(
            &party.identifier(),
            PartiesResource::Party,
            body,
            route,
            OutcomeKind::Success,
        )
        .await
    }

    /// `PUT /parties/{type}/{value}/error` with the error information
    pub async fn dispatch_error(
        &self,
        identifier: &PartyIdentifier,
        error: &ErrorInformation,
        route: &ResponseRoute,
    ) -> LookupResult<()> {
        let body = serde_json::to_value(ErrorInformationResponse {
            error_information: error.clone(),
        })?;
        self.send(
            identifier,
            PartiesResource::Error,
            body,
            route,
            OutcomeKind::Failure,
        )
        .await
    }

    /// Send the workflow's answer to an inbound lookup, speaking as `source`
    pub async fn answer_lookup(&self, source: &str, answer: WorkflowAnswer) -> LookupResult<()> {
        let inbound = answer.traceparent.as_deref().and_then(TraceContext::parse);
        let route = ResponseRoute::new(
            source,
            answer.requester,
            TraceContext::continue_or_generate(inbound.as_ref()),
        );
        match &answer.outcome {
            LookupOutcome::Success { party } => {
                if party.identifier() != answer.identifier {
                    warn!(
                        "Workflow answered {} with party {}",
                        answer.identifier,
                        party.identifier()
                    );
                }
                self.dispatch_success(party, &route).await
            }
            LookupOutcome::Failure { error } => {
                self.dispatch_error(&answer.identifier, error, &route).await
            }
        }
    }

    /// Resume the awaiting workflow and answer the callback's sender
    pub async fn handle_correlated(&self, event: CorrelatedLookup) -> LookupResult<()> {
        if let Err(e) = self.resume_workflow(&event).await {
            warn!(
                "Workflow for transaction {} not resumed: {}",
                event.context.transaction_id, e
            );
        }

        let route = ResponseRoute::for_callback(&event)?;
        match &event.outcome {
            LookupOutcome::Success { party } => self.dispatch_success(party, &route).await,
            LookupOutcome::Failure { error } => {
                self.dispatch_error(&event.identifier, error, &route).await
            }
        }
    }

    async fn resume_workflow(&self, event: &CorrelatedLookup) -> LookupResult<()> {
        let mut vars = WorkflowVariables::new();
        vars.insert(
            variables::TRANSACTION_ID.to_string(),
            event.context.transaction_id.clone().into(),
        );
        vars.insert(
            variables::TENANT_ID.to_string(),
            event.context.tenant_id.clone().into(),
        );
        vars.insert(
            variables::PARTY_LOOKUP_FAILED.to_string(),
            event.lookup_failed.into(),
        );
        match &event.outcome {
            LookupOutcome::Success { party } => {
                vars.insert(
                    variables::PAYEE_PARTY_RESPONSE.to_string(),
                    serde_json::to_string(party)?.into(),
                );
            }
            LookupOutcome::Failure { error } => {
                vars.insert(
                    variables::ERROR_INFORMATION.to_string(),
                    serde_json::to_string(error)?.into(),
                );
            }
        }

        self.workflow
            .publish_message(&self.response_message, &event.context.transaction_id, vars)
            .await
    }

    async fn send(
        &self,
        identifier: &PartyIdentifier,
        resource: PartiesResource,
        body: serde_json::Value,
        route: &ResponseRoute,
        kind: OutcomeKind,
    ) -> LookupResult<()> {
        let request = OutboundRequest {
            method: Method::PUT,
            url: self.address.parties(identifier, resource),
            headers: OutboundHeaders::party_response(&route.source, &route.destination, &route.trace),
            body: Some(body),
        };

        info!(
            "{} -> SWITCH {} response for {} to {}",
            route.source,
            kind.as_str(),
            identifier,
            route.destination
        );

        match self.transport.send(request).await {
            Ok(()) => {
                crate::metrics::record_dispatch(kind);
                if let Err(e) = self.tracker.advance(identifier, LookupState::Dispatched(kind)) {
                    debug!("Lookup state for {} not advanced: {}", identifier, e);
                }
                Ok(())
            }
            Err(e) => {
                error!(
                    "{} response for {} not delivered (retryable: {}): {}",
                    kind.as_str(),
                    identifier,
                    e.is_retryable(),
                    e
                );
                crate::metrics::record_dispatch_failure(kind);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl OutcomeSink for ResponseDispatcher {
    async fn deliver(&self, event: CorrelatedLookup) -> LookupResult<()> {
        self.handle_correlated(event).await
    }
}

/// Drains correlated lookups, one task per event
pub struct DispatchWorker {
    rx: mpsc::Receiver<CorrelatedLookup>,
    dispatcher: Arc<ResponseDispatcher>,
}

impl DispatchWorker {
    pub fn new(rx: mpsc::Receiver<CorrelatedLookup>, dispatcher: Arc<ResponseDispatcher>) -> Self {
        Self { rx, dispatcher }
    }

    /// Run until every sender is dropped, then wait for in-flight dispatches
    pub async fn run(mut self) -> LookupResult<()> {
        info!("Dispatch worker started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    let dispatcher = self.dispatcher.clone();
                    in_flight.spawn(async move {
                        let transaction_id = event.context.transaction_id.clone();
                        if let Err(e) = dispatcher.handle_correlated(event).await {
                            error!("Dispatch for transaction {} failed: {}", transaction_id, e);
                        }
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    Self::reap(joined);
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Draining {} in-flight dispatches", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            Self::reap(joined);
        }
        info!("Dispatch worker stopped");
        Ok(())
    }

    fn reap(joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            error!("Dispatch task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryContextCache, TransactionContextCache};
    use crate::lookup::correlator::{CallbackCorrelator, CorrelationReport};
    use crate::party::headers::{FSPIOP_DESTINATION, FSPIOP_SOURCE, TRACEPARENT};
    use crate::party::{PartyIdType, ProtocolHeaders, TransactionContext};
    use crate::switch::transport::MockSwitchTransport;
    use crate::workflow::MockWorkflowEngine;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    const BASE: &str = "http://switch.local:4002";

    fn scenario_id() -> PartyIdentifier {
        PartyIdentifier::new(PartyIdType::Msisdn, "254700000001")
    }

    fn party() -> PartyDetails {
        serde_json::from_value(json!({
            "partyIdInfo": {
                "partyIdType": "MSISDN",
                "partyIdentifier": "254700000001",
                "fspId": "payeefsp"
            },
            "name": "Jane Doe"
        }))
        .unwrap()
    }

    fn callback_headers() -> ProtocolHeaders {
        ProtocolHeaders {
            source: Some("payeefsp".to_string()),
            destination: Some("payerfsp".to_string()),
            traceparent: Some(
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
            ),
            date: None,
        }
    }

    fn quiet_workflow() -> MockWorkflowEngine {
        let mut workflow = MockWorkflowEngine::new();
        workflow.expect_publish_message().returning(|_, _, _| Ok(()));
        workflow
    }

    /// Transport that records every request it is asked to send
    fn recording_transport() -> (MockSwitchTransport, Arc<Mutex<Vec<OutboundRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = sent.clone();
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().returning(move |req| {
            captured.lock().unwrap().push(req);
            Ok(())
        });
        (transport, sent)
    }

    fn dispatcher(transport: MockSwitchTransport, workflow: MockWorkflowEngine) -> ResponseDispatcher {
        ResponseDispatcher::new(
            Arc::new(transport),
            SwitchAddress::new(BASE).unwrap(),
            Arc::new(workflow),
            "party-lookup-response",
            Arc::new(LookupTracker::new()),
        )
    }

    async fn correlate_through(
        outcome: LookupOutcome,
    ) -> (CorrelationReport, Vec<OutboundRequest>) {
        let cache = Arc::new(InMemoryContextCache::new(Duration::from_secs(60)));
        cache
            .put(scenario_id(), TransactionContext::new("T1", "tn01", "payerfsp"))
            .await;

        let (transport, sent) = recording_transport();
        let dispatcher = Arc::new(dispatcher(transport, quiet_workflow()));
        let correlator = CallbackCorrelator::new(
            cache,
            dispatcher,
            Arc::new(LookupTracker::new()),
            Duration::from_millis(100),
            true,
        );

        let report = correlator
            .correlate(scenario_id(), outcome, callback_headers())
            .await;
        let sent = sent.lock().unwrap().clone();
        (report, sent)
    }

    #[tokio::test]
    async fn test_success_callback_dispatches_party_to_identifier_address() {
        let (report, sent) = correlate_through(LookupOutcome::Success { party: party() }).await;

        assert!(matches!(report, CorrelationReport::Correlated { .. }));
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.method, Method::PUT);
        assert_eq!(
            request.url.as_str(),
            "http://switch.local:4002/parties/MSISDN/254700000001"
        );
        assert_eq!(request.body.as_ref().unwrap()["party"]["name"], "Jane Doe");
    }

    #[tokio::test]
    async fn test_error_callback_dispatches_to_error_suffix() {
        let error = ErrorInformation::new("3204", "Party not found");
        let (report, sent) = correlate_through(LookupOutcome::Failure { error }).await;

        assert!(matches!(
            report,
            CorrelationReport::Correlated { lookup_failed: true, .. }
        ));
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].url.as_str(),
            "http://switch.local:4002/parties/MSISDN/254700000001/error"
        );
        assert_eq!(
            sent[0].body.as_ref().unwrap()["errorInformation"]["errorCode"],
            "3204"
        );
    }

    #[tokio::test]
    async fn test_success_and_error_share_header_construction() {
        let (_, ok) = correlate_through(LookupOutcome::Success { party: party() }).await;
        let (_, failed) = correlate_through(LookupOutcome::Failure {
            error: ErrorInformation::new("3204", "Party not found"),
        })
        .await;

        let (ok, failed) = (&ok[0].headers, &failed[0].headers);
        assert_eq!(ok.names(), failed.names());
        for name in [FSPIOP_SOURCE, FSPIOP_DESTINATION] {
            assert_eq!(ok.get(name), failed.get(name));
        }
        assert_eq!(ok.get(FSPIOP_SOURCE), Some("payerfsp"));
        assert_eq!(ok.get(FSPIOP_DESTINATION), Some("payeefsp"));
        assert!(ok
            .get(TRACEPARENT)
            .unwrap()
            .contains("0af7651916cd43dd8448eb211c80319c"));
    }

    #[tokio::test]
    async fn test_miss_dispatches_nothing() {
        let cache = Arc::new(InMemoryContextCache::new(Duration::from_secs(60)));
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(0);
        let mut workflow = MockWorkflowEngine::new();
        workflow.expect_publish_message().times(0);

        let correlator = CallbackCorrelator::new(
            cache,
            Arc::new(dispatcher(transport, workflow)),
            Arc::new(LookupTracker::new()),
            Duration::from_millis(100),
            true,
        );
        let report = correlator
            .correlate(
                PartyIdentifier::new(PartyIdType::Msisdn, "000"),
                LookupOutcome::Success { party: party() },
                callback_headers(),
            )
            .await;

        assert_eq!(report, CorrelationReport::Miss);
        assert_eq!(correlator.miss_count(), 1);
    }

    #[tokio::test]
    async fn test_success_is_addressed_by_embedded_identifier() {
        let (transport, sent) = recording_transport();
        let dispatcher = dispatcher(transport, quiet_workflow());
        let mut other = party();
        other.party_id_info.party_identifier = "254799999999".to_string();

        let route = ResponseRoute::new("payeefsp", "payerfsp", TraceContext::generate());
        dispatcher.dispatch_success(&other, &route).await.unwrap();

        assert!(sent.lock().unwrap()[0]
            .url
            .as_str()
            .ends_with("/parties/MSISDN/254799999999"));
    }

    #[tokio::test]
    async fn test_workflow_resumed_with_lookup_failed_flag() {
        let (transport, _) = recording_transport();
        let mut workflow = MockWorkflowEngine::new();
        workflow
            .expect_publish_message()
            .withf(|name, key, vars| {
                name == "party-lookup-response"
                    && key == "T1"
                    && vars[variables::PARTY_LOOKUP_FAILED] == true
                    && vars.contains_key(variables::ERROR_INFORMATION)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let event = CorrelatedLookup::new(
            TransactionContext::new("T1", "tn01", "payerfsp"),
            scenario_id(),
            LookupOutcome::Failure {
                error: ErrorInformation::new("3204", "Party not found"),
            },
            callback_headers(),
        );
        dispatcher(transport, workflow)
            .handle_correlated(event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_callback_without_source_is_not_dispatched() {
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().times(0);

        let mut headers = callback_headers();
        headers.source = None;
        let event = CorrelatedLookup::new(
            TransactionContext::new("T1", "tn01", "payerfsp"),
            scenario_id(),
            LookupOutcome::Success { party: party() },
            headers,
        );

        let err = dispatcher(transport, quiet_workflow())
            .handle_correlated(event)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_surfaced() {
        let mut transport = MockSwitchTransport::new();
        transport.expect_send().returning(|req| {
            Err(LookupError::NetworkDelivery {
                url: req.url.to_string(),
                message: "status 503".to_string(),
            })
        });

        let route = ResponseRoute::new("payeefsp", "payerfsp", TraceContext::generate());
        let err = dispatcher(transport, quiet_workflow())
            .dispatch_error(
                &scenario_id(),
                &ErrorInformation::new("2001", "Internal server error"),
                &route,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::NetworkDelivery { .. }));
    }

    #[tokio::test]
    async fn test_worker_dispatches_queued_events() {
        let (transport, sent) = recording_transport();
        let dispatcher = Arc::new(dispatcher(transport, quiet_workflow()));
        let (tx, rx) = mpsc::channel(4);

        tx.send(CorrelatedLookup::new(
            TransactionContext::new("T1", "tn01", "payerfsp"),
            scenario_id(),
            LookupOutcome::Success { party: party() },
            callback_headers(),
        ))
        .await
        .unwrap();
        drop(tx);

        DispatchWorker::new(rx, dispatcher).run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    /// Transport that takes a while before recording the request
    struct SlowTransport {
        sent: Arc<Mutex<Vec<OutboundRequest>>>,
    }

    #[async_trait]
    impl SwitchTransport for SlowTransport {
        async fn send(&self, request: OutboundRequest) -> LookupResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.sent.lock().unwrap().push(request);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_drains_in_flight_dispatches_before_stopping() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(ResponseDispatcher::new(
            Arc::new(SlowTransport { sent: sent.clone() }),
            SwitchAddress::new(BASE).unwrap(),
            Arc::new(quiet_workflow()),
            "party-lookup-response",
            Arc::new(LookupTracker::new()),
        ));
        let (tx, rx) = mpsc::channel(4);
        for transaction_id in ["T1", "T2"] {
            tx.send(CorrelatedLookup::new(
                TransactionContext::new(transaction_id, "tn01", "payerfsp"),
                scenario_id(),
                LookupOutcome::Success { party: party() },
                callback_headers(),
            ))
            .await
            .unwrap();
        }
        drop(tx);

        DispatchWorker::new(rx, dispatcher).run().await.unwrap();

        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_workflow_answer_continues_inbound_trace() {
        let (transport, sent) = recording_transport();
        let answer = WorkflowAnswer {
            identifier: scenario_id(),
            requester: "payerfsp".to_string(),
            traceparent: Some(
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
            ),
            outcome: LookupOutcome::Success { party: party() },
        };

        dispatcher(transport, MockWorkflowEngine::new())
            .answer_lookup("payeefsp", answer)
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].url.as_str(),
            "http://switch.local:4002/parties/MSISDN/254700000001"
        );
        assert_eq!(sent[0].headers.get(FSPIOP_SOURCE), Some("payeefsp"));
        assert_eq!(sent[0].headers.get(FSPIOP_DESTINATION), Some("payerfsp"));
        let traceparent = sent[0].headers.get(TRACEPARENT).unwrap();
        assert!(traceparent.contains("0af7651916cd43dd8448eb211c80319c"));
        assert!(!traceparent.contains("b7ad6b7169203331"));
    }
}
