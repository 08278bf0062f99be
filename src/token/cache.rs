//! Per-connection bearer token cache with TTL and single-flight issuance

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::Result;

/// Cache key prefix; the connection name is appended
const TOKEN_CACHE_PREFIX: &str = "salesforceToken.";

/// Salesforce session tokens live 8 hours
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(28_800);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe bearer token cache keyed by connection name.
///
/// Reads of valid entries are lock-free; a cache miss takes a per-key
/// async lock so at most one issuance per connection is in flight at a
/// time. Callers that lose the race re-check the entry after the winner
/// releases the lock.
pub struct TokenCache {
    entries: DashMap<String, CachedToken>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn cache_key(connection: &str) -> String {
        format!("{TOKEN_CACHE_PREFIX}{connection}")
    }

    /// Return the cached token for `connection`, or issue a fresh one.
    ///
    /// `issue` is called at most once per miss across all concurrent
    /// callers of the same connection.
    pub async fn get_or_refresh<F, Fut>(&self, connection: &str, issue: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let key = Self::cache_key(connection);

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                return Ok(entry.token.clone());
            }
        }

        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // The issuance that held the lock may have filled the entry
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                return Ok(entry.token.clone());
            }
        }

        debug!(connection, "Refreshing Salesforce token");
        let token = issue().await?;
        self.entries.insert(
            key,
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + TOKEN_CACHE_TTL,
            },
        );
        Ok(token)
    }

    /// Drop the cached entry for `connection`; the next
    /// [`Self::get_or_refresh`] will issue a fresh token.
    pub fn invalidate(&self, connection: &str) {
        if self.entries.remove(&Self::cache_key(connection)).is_some() {
            debug!(connection, "Invalidated cached Salesforce token");
        }
    }

    /// Whether a cached, unexpired token exists for `connection`
    #[must_use]
    pub fn contains(&self, connection: &str) -> bool {
        self.entries
            .get(&Self::cache_key(connection))
            .is_some_and(|entry| !entry.is_expired())
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, connection: &str) {
        if let Some(mut entry) = self.entries.get_mut(&Self::cache_key(connection)) {
            entry.expires_at = Instant::now() - Duration::from_secs(1);
        }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
