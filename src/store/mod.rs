//! Persistent token storage shared across execution contexts
//!
//! A token store holds the two credential strings (`access_token` and
//! `refresh_token`) for one backend origin. Every process (or, for the
//! in-memory store, every context handle) of the same user sees the same
//! values, and a write made by one context is announced to the others as a
//! [`StoreChange`].
//!
//! Tokens are kept in clear text. Anything running as the same user can read
//! them, which is the same exposure browser storage has to injected scripts.
//! That is acceptable for an internal admin tool only: the store is a
//! sharing mechanism, not a security boundary.

use tokio::sync::broadcast;

use crate::error::StoreError;

#[cfg(test)]
pub mod memory;
pub mod sqlite;

pub use sqlite::SqliteTokenStore;

/// Key holding the short-lived bearer token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key holding the long-lived refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Capacity of each context's change notification channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Notification that another execution context mutated the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// The key that changed, when the backend can tell
    pub key: Option<String>,
}

/// Origin-scoped key/value store for credentials.
///
/// All operations are synchronous. Implementations must only notify
/// subscribers about writes made by *other* contexts.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Write several keys as one change. Stores that can commit atomically
    /// override this so no reader sees half of a credential pair.
    fn set_many(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys as one change
    fn remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Subscribe to cross-context change notifications
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Check for changes made by other contexts that cannot push
    /// notifications on their own. Returns true if a change was announced.
    fn poll_changes(&self) -> StoreResult<bool> {
        Ok(false)
    }
}
