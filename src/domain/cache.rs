//! Bounded, TTL-expiring cache of historical bars.
//!
//! Entries are written once per key and never mutated; readers get an
//! `Arc` snapshot, so a reader holding an old entry is unaffected by a
//! later refresh. Shared across threads behind `Arc<HistoricalCache>`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use super::error::TradeError;
use super::ohlcv::Bar;

pub const DEFAULT_CAPACITY: usize = 256;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub timeframe: String,
    pub window: usize,
}

impl CacheKey {
    pub fn new(symbol: &str, timeframe: &str, window: usize) -> Self {
        CacheKey {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            window,
        }
    }
}

#[derive(Debug)]
struct Entry {
    bars: Arc<[Bar]>,
    created_at: Instant,
}

#[derive(Debug)]
pub struct HistoricalCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    capacity: usize,
    ttl: Duration,
}

impl Default for HistoricalCache {
    fn default() -> Self {
        HistoricalCache {
            entries: RwLock::new(HashMap::new()),
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
        }
    }
}

impl HistoricalCache {
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self, TradeError> {
        if capacity == 0 {
            return Err(TradeError::invalid_config(
                "data",
                "cache_capacity",
                "cache_capacity must be at least 1",
            ));
        }
        if ttl.is_zero() {
            return Err(TradeError::invalid_config(
                "data",
                "cache_ttl_secs",
                "cache_ttl_secs must be positive",
            ));
        }
        Ok(HistoricalCache {
            entries: RwLock::new(HashMap::new()),
            capacity,
            ttl,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[Bar]>> {
        self.get_at(key, Instant::now())
    }

    /// Lookup as of `now`. Expired entries read as missing; they are
    /// reclaimed on the next insert.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Arc<[Bar]>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| now.saturating_duration_since(e.created_at) <= self.ttl)
            .map(|e| Arc::clone(&e.bars))
    }

    pub fn insert(&self, key: CacheKey, bars: Vec<Bar>) -> Arc<[Bar]> {
        self.insert_at(key, bars, Instant::now())
    }

    /// Store `bars` under `key` as of `now`, evicting expired entries and
    /// then the oldest live ones until the cache is within capacity.
    pub fn insert_at(&self, key: CacheKey, bars: Vec<Bar>, now: Instant) -> Arc<[Bar]> {
        let bars: Arc<[Bar]> = bars.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let ttl = self.ttl;
        entries.retain(|_, e| now.saturating_duration_since(e.created_at) <= ttl);
        while entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(symbol = %k.symbol, timeframe = %k.timeframe, "evicting cached bars");
                    entries.remove(&k);
                }
                None => break,
            }
        }

        entries.insert(
            key,
            Entry {
                bars: Arc::clone(&bars),
                created_at: now,
            },
        );
        bars
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
