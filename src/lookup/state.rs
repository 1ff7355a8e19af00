//! Per-lookup state tracking
//!
//! `Initiated -> AwaitingCallback -> Correlated(kind) -> Dispatched(kind)`, with
//! `CorrelationMiss` as the alternate terminal state of the callback path.

use crate::error::{LookupError, LookupResult};
use crate::party::{OutcomeKind, PartyIdentifier};

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Initiated,
    AwaitingCallback,
    Correlated(OutcomeKind),
    CorrelationMiss,
    Dispatched(OutcomeKind),
}

impl LookupState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LookupState::CorrelationMiss | LookupState::Dispatched(_))
    }

    /// A callback may overtake the `AwaitingCallback` bookkeeping, so
    /// correlation is accepted straight from `Initiated`.
    pub fn can_transition_to(&self, next: &LookupState) -> bool {
        use LookupState::*;
        match (self, next) {
            (Initiated, AwaitingCallback) => true,
            (Initiated | AwaitingCallback, Correlated(_) | CorrelationMiss) => true,
            (Correlated(a), Dispatched(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LookupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupState::Initiated => write!(f, "initiated"),
            LookupState::AwaitingCallback => write!(f, "awaiting_callback"),
            LookupState::Correlated(kind) => write!(f, "correlated_{}", kind.as_str()),
            LookupState::CorrelationMiss => write!(f, "correlation_miss"),
            LookupState::Dispatched(kind) => write!(f, "dispatched_{}", kind.as_str()),
        }
    }
}

/// Lookup state counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LookupStats {
    pub initiated: u64,
    pub awaiting_callback: u64,
    pub correlated: u64,
    pub correlation_miss: u64,
    pub dispatched: u64,
}

#[derive(Debug, Clone, Copy)]
struct TrackedLookup {
    state: LookupState,
    since: Instant,
}

impl TrackedLookup {
    fn new(state: LookupState) -> Self {
        Self {
            state,
            since: Instant::now(),
        }
    }
}

/// Tracks the state of every lookup known to this instance
pub struct LookupTracker {
    states: DashMap<PartyIdentifier, TrackedLookup>,
}

impl LookupTracker {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Start tracking a new lookup.
    ///
    /// Returns the previous state if a lookup for the same identifier is still
    /// in flight.
    pub fn begin(&self, identifier: &PartyIdentifier) -> Option<LookupState> {
        self.states
            .insert(identifier.clone(), TrackedLookup::new(LookupState::Initiated))
            .map(|previous| previous.state)
            .filter(|previous| !previous.is_terminal())
    }

    /// Move a lookup to `next`.
    ///
    /// Unknown identifiers are recorded as-is: the context may have been cached
    /// by another instance, or the lookup may belong to the payee flow.
    pub fn advance(&self, identifier: &PartyIdentifier, next: LookupState) -> LookupResult<()> {
        let mut entry = self
            .states
            .entry(identifier.clone())
            .or_insert_with(|| TrackedLookup::new(next));
        let current = entry.state;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(&next) {
            return Err(LookupError::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *entry = TrackedLookup::new(next);
        Ok(())
    }

    /// Drop tracking for a lookup that never left this instance
    pub fn forget(&self, identifier: &PartyIdentifier) {
        self.states.remove(identifier);
    }

    pub fn state(&self, identifier: &PartyIdentifier) -> Option<LookupState> {
        self.states.get(identifier).map(|s| s.state)
    }

    /// Remove finished lookups and lookups stuck in one state for longer than
    /// `stale_after`, returning how many were removed.
    ///
    /// Nothing cancels a lookup; one whose callback never arrives goes stale
    /// once its cached context has expired.
    pub fn prune(&self, stale_after: Duration) -> usize {
        let now = Instant::now();
        let before = self.states.len();
        self.states.retain(|_, tracked| {
            !tracked.state.is_terminal() && now.duration_since(tracked.since) < stale_after
        });
        before.saturating_sub(self.states.len())
    }

    pub fn stats(&self) -> LookupStats {
        let mut stats = LookupStats::default();
        for entry in self.states.iter() {
            match entry.value().state {
                LookupState::Initiated => stats.initiated += 1,
                LookupState::AwaitingCallback => stats.awaiting_callback += 1,
                LookupState::Correlated(_) => stats.correlated += 1,
                LookupState::CorrelationMiss => stats.correlation_miss += 1,
                LookupState::Dispatched(_) => stats.dispatched += 1,
            }
        }
        stats
    }
}

impl Default for LookupTracker {
    fn default() -> Self {
        Self::new()
    }
}
