//! Protocol message id → bus message id correlation with expiry.
//!
//! Entries are written before an outbound send is dispatched and read back
//! when the protocol reports an acknowledgement or a delivery receipt. A miss
//! is normal (TTL expiry, a replayed receipt, or a message sent before a
//! restart) and is reported as [`CorrelationError::NotFound`].

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Default correlation lifetime: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors raised by a key/value backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite backend failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from correlation lookups.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// No live entry for this protocol id.
    #[error("no correlation for protocol message {protocol_id}")]
    NotFound {
        /// The protocol id that missed.
        protocol_id: String,
    },

    /// The backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CorrelationError {
    /// Whether this is an expected miss rather than a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Key/value service with native per-key expiry.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Fetch the live value for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` and return its live value in one step.
    ///
    /// Of several concurrent calls for the same key, at most one gets the value.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Usage contract layered over a [`KeyValueBackend`].
pub struct CorrelationStore {
    backend: Box<dyn KeyValueBackend>,
    key_prefix: String,
    ttl: Duration,
}

impl CorrelationStore {
    /// Create a store over `backend`, namespacing keys with `key_prefix`.
    pub fn new(backend: Box<dyn KeyValueBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the default entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The lifetime used by [`Self::record_default`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, protocol_id: &str) -> String {
        if self.key_prefix.is_empty() {
            protocol_id.to_owned()
        } else {
            format!("{}:{protocol_id}", self.key_prefix)
        }
    }

    /// Record `protocol_id → bus_id`, overwriting any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend write fails.
    pub async fn record(
        &self,
        protocol_id: &str,
        bus_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.backend
            .set_with_expiry(&self.key(protocol_id), bus_id, ttl)
            .await?;
        debug!(protocol_id, bus_id, ttl_secs = ttl.as_secs(), "correlation recorded");
        Ok(())
    }

    /// Record with the store's configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend write fails.
    pub async fn record_default(&self, protocol_id: &str, bus_id: &str) -> Result<(), StoreError> {
        self.record(protocol_id, bus_id, self.ttl).await
    }

    /// Look up the bus id without removing the entry.
    ///
    /// # Errors
    ///
    /// [`CorrelationError::NotFound`] on a miss; [`CorrelationError::Store`]
    /// if the backend fails.
    pub async fn resolve(&self, protocol_id: &str) -> Result<String, CorrelationError> {
        self.backend
            .get(&self.key(protocol_id))
            .await?
            .ok_or_else(|| CorrelationError::NotFound {
                protocol_id: protocol_id.to_owned(),
            })
    }

    /// Look up the bus id and remove the entry atomically.
    ///
    /// Concurrent retires of the same id resolve it at most once.
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve`].
    pub async fn resolve_and_retire(&self, protocol_id: &str) -> Result<String, CorrelationError> {
        let bus_id = self
            .backend
            .take(&self.key(protocol_id))
            .await?
            .ok_or_else(|| CorrelationError::NotFound {
                protocol_id: protocol_id.to_owned(),
            })?;
        debug!(protocol_id, %bus_id, "correlation retired");
        Ok(bus_id)
    }

    /// Drop the entry for a message that was never sent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend delete fails.
    pub async fn discard(&self, protocol_id: &str) -> Result<(), StoreError> {
        self.backend.delete(&self.key(protocol_id)).await?;
        debug!(protocol_id, "correlation discarded");
        Ok(())
    }
}

impl std::fmt::Debug for CorrelationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
