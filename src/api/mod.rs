//! HTTP API: switch callbacks, channel entry point, workflow answers, health and stats

use crate::cache::TransactionContextCache;
use crate::config::ApiConfig;
use crate::directory::ParticipantDirectory;
use crate::error::{LookupError, LookupResult, ResultExt};
use crate::lookup::{
    CallbackCorrelator, CorrelationReport, LookupInitiator, LookupReceiver, LookupStats,
    LookupTracker, ResponseDispatcher, ResponseRoute, WorkflowAnswer,
};
use crate::party::{
    ErrorInformation, ErrorInformationResponse, LookupOutcome, PartyDetails, PartyIdentifier,
    PartySwitchResponse, ProtocolHeaders, TraceContext, TransactionChannelRequest,
    TransactionContext,
};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<LookupReceiver>,
    pub initiator: Arc<LookupInitiator>,
    pub correlator: Arc<CallbackCorrelator>,
    pub dispatcher: Arc<ResponseDispatcher>,
    pub cache: Arc<dyn TransactionContextCache>,
    pub directory: Arc<dyn ParticipantDirectory>,
    pub tracker: Arc<LookupTracker>,
    /// FSP id used when answering a peer before any context exists
    pub fsp_id: String,
}

/// Build the router without binding it
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route(
            "/switch/parties/:id_type/:id_value",
            get(inbound_lookup).put(party_callback),
        )
        .route("/switch/parties/:id_type/:id_value/error", put(error_callback))
        .route("/channel/party-lookup", post(channel_lookup))
        .route("/workflow/party-response", post(workflow_answer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> LookupResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .internal("bind API listener")?;
    axum::serve(listener, app).await.internal("serve API")?;

    Ok(())
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = match &self {
            LookupError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            LookupError::DirectoryResolution { .. } | LookupError::TenantResolution { .. } => {
                StatusCode::NOT_FOUND
            }
            LookupError::CorrelationMiss { .. } => StatusCode::NOT_FOUND,
            LookupError::NetworkDelivery { .. } => StatusCode::BAD_GATEWAY,
            LookupError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LookupError::Workflow(_) => StatusCode::SERVICE_UNAVAILABLE,
            LookupError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            LookupError::Config(_) | LookupError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorInformationResponse {
            error_information: self.to_error_information(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    crate::metrics::record_health_check();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the directory must know at least one party
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let directory_entries = state.directory.entry_count();
    let ready = directory_entries > 0;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            directory_entries,
        }),
    )
}

/// Lookup state counts and cache size
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        lookups: state.tracker.stats(),
        cached_contexts: state.cache.entry_count(),
        correlation_misses: state.correlator.miss_count(),
    })
}

/// `GET /parties/{type}/{value}` from the switch (payee side).
///
/// Always acknowledged with 202; failures the peer must hear about are sent
/// back as an error response.
async fn inbound_lookup(
    State(state): State<AppState>,
    Path((id_type, id_value)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, LookupError> {
    let identifier = PartyIdentifier::parse(&id_type, &id_value)?;
    let headers = ProtocolHeaders::from_header_map(&headers);

    if let Err(e) = state.receiver.receive(&identifier, &headers).await {
        warn!("Inbound lookup for {} failed: {}", identifier, e);
        answer_with_error(&state, &identifier, &headers, &e).await;
    }

    Ok(StatusCode::ACCEPTED)
}

async fn answer_with_error(
    state: &AppState,
    identifier: &PartyIdentifier,
    headers: &ProtocolHeaders,
    error: &LookupError,
) {
    if !error.is_peer_visible() {
        return;
    }
    let Some(destination) = headers.source.clone() else {
        warn!("Cannot answer lookup for {}: no FSPIOP-Source", identifier);
        return;
    };

    let route = ResponseRoute::new(
        state.fsp_id.clone(),
        destination,
        TraceContext::continue_or_generate(headers.trace_context().as_ref()),
    );
    if let Err(e) = state
        .dispatcher
        .dispatch_error(identifier, &error.to_error_information(), &route)
        .await
    {
        warn!("Error response for {} not delivered: {}", identifier, e);
    }
}

/// `PUT /parties/{type}/{value}`: success callback (payer side)
async fn party_callback(
    State(state): State<AppState>,
    Path((id_type, id_value)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<PartySwitchResponse>,
) -> Result<Json<CallbackResponse>, LookupError> {
    let identifier = PartyIdentifier::parse(&id_type, &id_value)?;
    let outcome = LookupOutcome::Success { party: body.party };
    Ok(correlate(&state, identifier, outcome, &headers).await)
}

/// `PUT /parties/{type}/{value}/error`: error callback (payer side)
async fn error_callback(
    State(state): State<AppState>,
    Path((id_type, id_value)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ErrorInformationResponse>,
) -> Result<Json<CallbackResponse>, LookupError> {
    let identifier = PartyIdentifier::parse(&id_type, &id_value)?;
    let outcome = LookupOutcome::Failure {
        error: body.error_information,
    };
    Ok(correlate(&state, identifier, outcome, &headers).await)
}

async fn correlate(
    state: &AppState,
    identifier: PartyIdentifier,
    outcome: LookupOutcome,
    headers: &HeaderMap,
) -> Json<CallbackResponse> {
    let headers = ProtocolHeaders::from_header_map(headers);
    let report = state.correlator.correlate(identifier, outcome, headers).await;
    Json(CallbackResponse::from(report))
}

/// Payee-side answer: the lookup workflow hands back its result for the switch
async fn workflow_answer(
    State(state): State<AppState>,
    Json(body): Json<WorkflowAnswerRequest>,
) -> Result<StatusCode, LookupError> {
    let answer = body.into_answer()?;
    info!(
        "Workflow answered {} with {} for {}",
        answer.identifier,
        answer.outcome.kind().as_str(),
        answer.requester
    );
    state.dispatcher.answer_lookup(&state.fsp_id, answer).await?;
    Ok(StatusCode::OK)
}

/// Payer-side entry: cache the transaction context, then send the lookup
async fn channel_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChannelLookupRequest>,
) -> Result<(StatusCode, Json<ChannelLookupResponse>), LookupError> {
    let payee = body.transaction_request.payee_identifier()?;
    let payer = body.transaction_request.payer_identifier()?;
    let source = state
        .directory
        .resolve_participant(payer.id_type, &payer.id_value)
        .await?;

    let context = TransactionContext::new(
        body.transaction_id.clone(),
        body.tenant_id.clone(),
        source.fsp_id,
    );
    let displaced = state.cache.put(payee.clone(), context).await;
    if let Some(previous) = &displaced {
        warn!(
            "Context for {} replaced: transaction {} superseded by {}",
            payee, previous.transaction_id, body.transaction_id
        );
    }

    let trace = ProtocolHeaders::from_header_map(&headers).trace_context();
    if let Err(e) = state
        .initiator
        .initiate(&body.transaction_request, trace.as_ref())
        .await
    {
        rollback_context(&state, &payee, &body.transaction_id, displaced).await;
        return Err(e);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ChannelLookupResponse {
            transaction_id: body.transaction_id,
            party_id_type: payee.id_type.as_str().to_string(),
            party_identifier: payee.id_value,
        }),
    ))
}

/// Undo the cache write of a lookup that never left this instance.
///
/// A context written meanwhile by a newer request is left in place; otherwise
/// the context this request displaced becomes live again.
async fn rollback_context(
    state: &AppState,
    payee: &PartyIdentifier,
    transaction_id: &str,
    displaced: Option<TransactionContext>,
) {
    if state.cache.take_if(payee, transaction_id).await.is_none() {
        debug!(
            "Context for {} no longer belongs to transaction {}",
            payee, transaction_id
        );
        return;
    }
    if let Some(previous) = displaced {
        info!(
            "Restoring context of transaction {} for {}",
            previous.transaction_id, payee
        );
        state.cache.put(payee.clone(), previous).await;
    }
}

// Request and response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelLookupRequest {
    transaction_id: String,
    tenant_id: String,
    transaction_request: TransactionChannelRequest,
}

/// Variables of a finished party lookup flow
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowAnswerRequest {
    party_id_type: String,
    party_id: String,
    #[serde(rename = "FSPIOP-Source")]
    requester: String,
    #[serde(default)]
    traceparent: Option<String>,
    #[serde(default)]
    party: Option<PartyDetails>,
    #[serde(default)]
    error_information: Option<ErrorInformation>,
}

impl WorkflowAnswerRequest {
    fn into_answer(self) -> LookupResult<WorkflowAnswer> {
        let identifier = PartyIdentifier::parse(&self.party_id_type, &self.party_id)?;
        let outcome = match (self.party, self.error_information) {
            (Some(party), None) => LookupOutcome::Success { party },
            (None, Some(error)) => LookupOutcome::Failure { error },
            _ => {
                return Err(LookupError::MalformedRequest(
                    "exactly one of party and errorInformation must be set".to_string(),
                ))
            }
        };
        Ok(WorkflowAnswer {
            identifier,
            requester: self.requester,
            traceparent: self.traceparent,
            outcome,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelLookupResponse {
    transaction_id: String,
    party_id_type: String,
    party_identifier: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    correlated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
}

impl From<CorrelationReport> for CallbackResponse {
    fn from(report: CorrelationReport) -> Self {
        match report {
            CorrelationReport::Correlated { transaction_id, .. } => Self {
                correlated: true,
                transaction_id: Some(transaction_id),
            },
            CorrelationReport::Dropped { transaction_id } => Self {
                correlated: false,
                transaction_id: Some(transaction_id),
            },
            CorrelationReport::Miss => Self {
                correlated: false,
                transaction_id: None,
            },
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    directory_entries: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    lookups: LookupStats,
    cached_contexts: usize,
    correlation_misses: u64,
}
