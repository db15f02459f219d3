//! TTL cache in front of a `FundGateway`
//!
//! Only successful responses are cached. When full, the entry closest to
//! expiry is evicted. Locks are never held while the inner gateway runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{FundGateway, GatewayResult};
use crate::models::{FundRecord, FundSummary, HistoryWindow, NavPoint, SchemeCode};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Search(String, usize),
    Fund(SchemeCode),
    History(SchemeCode, HistoryWindow),
}

#[derive(Debug, Clone)]
enum CacheValue {
    Matches(Vec<FundSummary>),
    Fund(FundRecord),
    History(Vec<NavPoint>),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

pub struct CachedGateway<G> {
    inner: G,
    ttl: Duration,
    max_size: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<G: FundGateway> CachedGateway<G> {
    pub fn new(inner: G, ttl: Duration, max_size: usize) -> Self {
        Self {
            inner,
            ttl,
            max_size: max_size.max(1),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.read().await.len(),
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheValue> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn store(&self, key: CacheKey, value: CacheValue) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = ?oldest, "Evicting cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }
}

#[async_trait]
impl<G: FundGateway> FundGateway for CachedGateway<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search_by_name(&self, term: &str, limit: usize) -> GatewayResult<Vec<FundSummary>> {
        let key = CacheKey::Search(term.trim().to_lowercase(), limit);
        if let Some(CacheValue::Matches(funds)) = self.lookup(&key).await {
            return Ok(funds);
        }

        let funds = self.inner.search_by_name(term, limit).await?;
        self.store(key, CacheValue::Matches(funds.clone())).await;
        Ok(funds)
    }

    async fn get_by_code(&self, code: &SchemeCode) -> GatewayResult<FundRecord> {
        let key = CacheKey::Fund(code.clone());
        if let Some(CacheValue::Fund(record)) = self.lookup(&key).await {
            return Ok(record);
        }

        let record = self.inner.get_by_code(code).await?;
        self.store(key, CacheValue::Fund(record.clone())).await;
        Ok(record)
    }

    async fn get_history(
        &self,
        code: &SchemeCode,
        window: HistoryWindow,
    ) -> GatewayResult<Vec<NavPoint>> {
        let key = CacheKey::History(code.clone(), window);
        if let Some(CacheValue::History(points)) = self.lookup(&key).await {
            return Ok(points);
        }

        let points = self.inner.get_history(code, window).await?;
        self.store(key, CacheValue::History(points.clone())).await;
        Ok(points)
    }
}
