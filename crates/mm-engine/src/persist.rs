//! Persistence contracts consumed at startup and by the persistence observers.
//!
//! The storage engine itself lives outside this repository. Anything that
//! implements [`CollectionStore`] / [`RecordStore`] can back the engine; the
//! in-memory implementations here back the null deployment and the tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mm_core::error::MmError;
use mm_core::types::*;
use tracing::error;

/// An append-only, per-identity collection (orders, trades, market trades).
#[async_trait]
pub trait CollectionStore<T>: Send + Sync {
    /// The most recent `limit` entries for `identity`, oldest first.
    async fn load(&self, identity: &ExchangeIdentity, limit: usize) -> Result<Vec<T>, MmError>;

    async fn append(&self, identity: &ExchangeIdentity, value: T) -> Result<(), MmError>;
}

/// A single latest-value record (safety settings, quoting parameters).
#[async_trait]
pub trait RecordStore<T>: Send + Sync {
    /// The latest persisted value, or the store's default if none exists.
    async fn load_latest(&self) -> Result<T, MmError>;

    async fn persist(&self, value: &T) -> Result<(), MmError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// In-memory [`CollectionStore`].
pub struct MemoryCollection<T> {
    rows: Mutex<Vec<(ExchangeIdentity, T)>>,
}

impl<T> MemoryCollection<T> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> CollectionStore<T> for MemoryCollection<T> {
    async fn load(&self, identity: &ExchangeIdentity, limit: usize) -> Result<Vec<T>, MmError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<T> = rows
            .iter()
            .rev()
            .filter(|(id, _)| id == identity)
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn append(&self, identity: &ExchangeIdentity, value: T) -> Result<(), MmError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*identity, value));
        Ok(())
    }
}

/// In-memory [`RecordStore`] falling back to a default value.
pub struct MemoryRecord<T> {
    default: T,
    latest: Mutex<Option<T>>,
}

impl<T> MemoryRecord<T> {
    pub fn new(default: T) -> Self {
        Self {
            default,
            latest: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> RecordStore<T> for MemoryRecord<T> {
    async fn load_latest(&self) -> Result<T, MmError> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(latest.clone().unwrap_or_else(|| self.default.clone()))
    }

    async fn persist(&self, value: &T) -> Result<(), MmError> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persistence bundle
// ---------------------------------------------------------------------------

/// Every store the engine loads from at startup and writes to afterwards.
#[derive(Clone)]
pub struct Persistence {
    pub orders: Arc<dyn CollectionStore<OrderStatusReport>>,
    pub trades: Arc<dyn CollectionStore<Trade>>,
    pub market_trades: Arc<dyn CollectionStore<ExchangePairMessage<MarketTrade>>>,
    pub safety: Arc<dyn RecordStore<SafetySettings>>,
    pub params: Arc<dyn RecordStore<QuotingParameters>>,
}

impl Persistence {
    /// Fresh in-memory stores with the default parameter records.
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(MemoryCollection::new()),
            trades: Arc::new(MemoryCollection::new()),
            market_trades: Arc::new(MemoryCollection::new()),
            safety: Arc::new(MemoryRecord::new(SafetySettings::default())),
            params: Arc::new(MemoryRecord::new(QuotingParameters::default())),
        }
    }
}

/// Append `value` on a background task. Called from synchronous bus handlers,
/// which cannot await; failures are logged.
pub fn spawn_append<T: Send + 'static>(
    store: Arc<dyn CollectionStore<T>>,
    identity: ExchangeIdentity,
    value: T,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Handle::try_current()?;
    runtime.spawn(async move {
        if let Err(e) = store.append(&identity, value).await {
            error!("[persist] append failed: {e}");
        }
    });
    Ok(())
}
