//! Callback correlator
//!
//! Success and error callbacks carry no transaction token, only the party
//! identifier. Both funnel through [`CallbackCorrelator::correlate`], which
//! recovers the cached transaction context and forwards one normalized event.

use super::state::{LookupState, LookupTracker};
use crate::cache::TransactionContextCache;
use crate::error::{LookupError, LookupResult};
use crate::party::{LookupOutcome, PartyIdentifier, ProtocolHeaders, TransactionContext};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A callback matched to its originating transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedLookup {
    pub context: TransactionContext,
    pub identifier: PartyIdentifier,
    pub outcome: LookupOutcome,
    /// Set iff `outcome` is a failure; kept next to the tag for flow branching
    pub lookup_failed: bool,
    /// Headers of the callback that produced the outcome
    pub headers: ProtocolHeaders,
}

impl CorrelatedLookup {
    pub fn new(
        context: TransactionContext,
        identifier: PartyIdentifier,
        outcome: LookupOutcome,
        headers: ProtocolHeaders,
    ) -> Self {
        let lookup_failed = outcome.is_failure();
        Self {
            context,
            identifier,
            outcome,
            lookup_failed,
            headers,
        }
    }
}

/// Receiver of correlated lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn deliver(&self, event: CorrelatedLookup) -> LookupResult<()>;
}

/// Sink that hands events to the dispatch worker
pub struct ChannelOutcomeSink {
    tx: mpsc::Sender<CorrelatedLookup>,
}

impl ChannelOutcomeSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CorrelatedLookup>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutcomeSink for ChannelOutcomeSink {
    async fn deliver(&self, event: CorrelatedLookup) -> LookupResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| LookupError::Internal("dispatch worker has stopped".to_string()))
    }
}

/// What happened to a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationReport {
    /// Context recovered and event forwarded
    Correlated {
        transaction_id: String,
        lookup_failed: bool,
    },
    /// Context recovered but the sink refused the event
    Dropped { transaction_id: String },
    /// No live context; nothing forwarded
    Miss,
}

pub struct CallbackCorrelator {
    cache: Arc<dyn TransactionContextCache>,
    sink: Arc<dyn OutcomeSink>,
    tracker: Arc<LookupTracker>,
    read_timeout: Duration,
    consume_on_correlate: bool,
    misses: AtomicU64,
}

impl CallbackCorrelator {
    pub fn new(
        cache: Arc<dyn TransactionContextCache>,
        sink: Arc<dyn OutcomeSink>,
        tracker: Arc<LookupTracker>,
        read_timeout: Duration,
        consume_on_correlate: bool,
    ) -> Self {
        Self {
            cache,
            sink,
            tracker,
            read_timeout,
            consume_on_correlate,
            misses: AtomicU64::new(0),
        }
    }

    /// Correlate a callback for `identifier`. Never fails outward.
    pub async fn correlate(
        &self,
        identifier: PartyIdentifier,
        outcome: LookupOutcome,
        headers: ProtocolHeaders,
    ) -> CorrelationReport {
        let kind = outcome.kind();
        crate::metrics::record_callback(kind);

        let Some(context) = self.lookup_context(&identifier).await else {
            self.record_miss(&identifier);
            return CorrelationReport::Miss;
        };

        info!(
            "SWITCH -> PAYER {} callback for {} correlated to transaction {}",
            kind.as_str(),
            identifier,
            context.transaction_id
        );
        if let Err(e) = self
            .tracker
            .advance(&identifier, LookupState::Correlated(kind))
        {
            debug!("Lookup state for {} not advanced: {}", identifier, e);
        }

        let transaction_id = context.transaction_id.clone();
        let event = CorrelatedLookup::new(context, identifier, outcome, headers);
        let lookup_failed = event.lookup_failed;

        match self.sink.deliver(event).await {
            Ok(()) => CorrelationReport::Correlated {
                transaction_id,
                lookup_failed,
            },
            Err(e) => {
                error!("Correlated lookup for {} dropped: {}", transaction_id, e);
                CorrelationReport::Dropped { transaction_id }
            }
        }
    }

    /// Total correlation misses since start
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    async fn lookup_context(&self, identifier: &PartyIdentifier) -> Option<TransactionContext> {
        let read = async {
            if self.consume_on_correlate {
                self.cache.take(identifier).await
            } else {
                self.cache.get(identifier).await
            }
        };

        match timeout(self.read_timeout, read).await {
            Ok(context) => context,
            Err(_) => {
                warn!(
                    "Cache read for {} exceeded {:?}",
                    identifier, self.read_timeout
                );
                None
            }
        }
    }

    fn record_miss(&self, identifier: &PartyIdentifier) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_correlation_miss(identifier.id_type);
        if let Err(e) = self
            .tracker
            .advance(identifier, LookupState::CorrelationMiss)
        {
            debug!("Lookup state for {} not advanced: {}", identifier, e);
        }
        let miss = LookupError::CorrelationMiss {
            identifier: identifier.clone(),
        };
        warn!("{} - callback dropped", miss);
    }
}
