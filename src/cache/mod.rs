//! Transaction context cache
//!
//! Explicit correlation table: party identifier -> transaction context, with a
//! TTL per entry. Written once by the surrounding transaction flow before a
//! lookup is initiated and read once by the callback correlator.
//!
//! Two concurrent lookups for the same identifier share one slot; the later
//! write wins and the earlier callback correlates against it.

use crate::party::{PartyIdentifier, TransactionContext};

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Port for the correlation table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionContextCache: Send + Sync {
    /// Store a context, returning the live context it replaced, if any
    async fn put(
        &self,
        identifier: PartyIdentifier,
        context: TransactionContext,
    ) -> Option<TransactionContext>;

    /// Read a live context without invalidating it
    async fn get(&self, identifier: &PartyIdentifier) -> Option<TransactionContext>;

    /// Read and invalidate a live context in one step
    async fn take(&self, identifier: &PartyIdentifier) -> Option<TransactionContext>;

    /// Invalidate the context only while it still belongs to `transaction_id`
    async fn take_if(
        &self,
        identifier: &PartyIdentifier,
        transaction_id: &str,
    ) -> Option<TransactionContext>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> usize;

    /// Number of entries currently held (live or not yet purged)
    fn entry_count(&self) -> usize;
}

struct CachedContext {
    context: TransactionContext,
    expires_at: Instant,
}

impl CachedContext {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process cache backed by a `DashMap`
pub struct InMemoryContextCache {
    entries: DashMap<PartyIdentifier, CachedContext>,
    ttl: Duration,
}

impl InMemoryContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl TransactionContextCache for InMemoryContextCache {
    async fn put(
        &self,
        identifier: PartyIdentifier,
        context: TransactionContext,
    ) -> Option<TransactionContext> {
        let now = Instant::now();
        let entry = CachedContext {
            context,
            expires_at: now + self.ttl,
        };
        let previous = self.entries.insert(identifier, entry);
        crate::metrics::record_cache_size(self.entries.len());

        previous.filter(|p| p.is_live(now)).map(|p| p.context)
    }

    async fn get(&self, identifier: &PartyIdentifier) -> Option<TransactionContext> {
        let now = Instant::now();
        self.entries
            .get(identifier)
            .filter(|e| e.is_live(now))
            .map(|e| e.context.clone())
    }

    async fn take(&self, identifier: &PartyIdentifier) -> Option<TransactionContext> {
        let now = Instant::now();
        let removed = self.entries.remove(identifier);
        crate::metrics::record_cache_size(self.entries.len());

        match removed {
            Some((_, entry)) if entry.is_live(now) => Some(entry.context),
            Some((key, _)) => {
                debug!("Discarded expired context for {}", key);
                None
            }
            None => None,
        }
    }

    async fn take_if(
        &self,
        identifier: &PartyIdentifier,
        transaction_id: &str,
    ) -> Option<TransactionContext> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(identifier, |_, entry| entry.context.transaction_id == transaction_id);
        crate::metrics::record_cache_size(self.entries.len());

        removed
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.context)
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let purged = before.saturating_sub(self.entries.len());
        crate::metrics::record_cache_size(self.entries.len());

        if purged > 0 {
            debug!("Purged {} expired transaction contexts", purged);
        }
        purged
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::PartyIdType;

    fn msisdn(value: &str) -> PartyIdentifier {
        PartyIdentifier::new(PartyIdType::Msisdn, value)
    }

    #[tokio::test]
    async fn test_take_consumes_entry() {
        let cache = InMemoryContextCache::new(Duration::from_secs(60));
        let ctx = TransactionContext::new("T1", "tn01", "payerfsp");
        assert!(cache.put(msisdn("254700000001"), ctx.clone()).await.is_none());

        assert_eq!(cache.get(&msisdn("254700000001")).await, Some(ctx.clone()));
        assert_eq!(cache.take(&msisdn("254700000001")).await, Some(ctx));
        assert!(cache.take(&msisdn("254700000001")).await.is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_second_put_reports_replaced_live_context() {
        let cache = InMemoryContextCache::new(Duration::from_secs(60));
        let first = TransactionContext::new("T1", "tn01", "payerfsp");
        let second = TransactionContext::new("T2", "tn01", "payerfsp");

        cache.put(msisdn("254700000001"), first.clone()).await;
        let replaced = cache.put(msisdn("254700000001"), second.clone()).await;

        assert_eq!(replaced, Some(first));
        assert_eq!(cache.take(&msisdn("254700000001")).await, Some(second));
    }

    #[tokio::test]
    async fn test_take_if_leaves_newer_context_alone() {
        let cache = InMemoryContextCache::new(Duration::from_secs(60));
        let newer = TransactionContext::new("T2", "tn01", "payerfsp");
        cache.put(msisdn("254700000001"), newer.clone()).await;

        assert!(cache.take_if(&msisdn("254700000001"), "T1").await.is_none());
        assert_eq!(cache.get(&msisdn("254700000001")).await, Some(newer.clone()));

        assert_eq!(cache.take_if(&msisdn("254700000001"), "T2").await, Some(newer));
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible_and_purged() {
        let cache = InMemoryContextCache::new(Duration::from_millis(10));
        cache
            .put(msisdn("1"), TransactionContext::new("T1", "tn01", "payerfsp"))
            .await;
        cache
            .put(msisdn("2"), TransactionContext::new("T2", "tn01", "payerfsp"))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get(&msisdn("1")).await.is_none());
        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_take_is_a_miss() {
        let cache = InMemoryContextCache::new(Duration::from_millis(5));
        cache
            .put(msisdn("1"), TransactionContext::new("T1", "tn01", "payerfsp"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.take(&msisdn("1")).await.is_none());
        assert_eq!(cache.entry_count(), 0);
    }
}
