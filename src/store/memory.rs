//! In-memory token store with per-context change notifications

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::{CHANGE_CHANNEL_CAPACITY, StoreChange, StoreResult, TokenStore};

#[derive(Default)]
struct Shared {
    values: Mutex<HashMap<String, String>>,
    contexts: Mutex<Vec<(u64, broadcast::Sender<StoreChange>)>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Token store living in process memory.
///
/// Handles created with [`MemoryTokenStore::context`] share the same values
/// but act as separate execution contexts: a write through one handle is
/// announced to every other handle's subscribers, never to its own.
pub struct MemoryTokenStore {
    id: u64,
    shared: Arc<Shared>,
    tx: broadcast::Sender<StoreChange>,
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("context", &self.id)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    /// Create an empty store and its first context
    pub fn new() -> Self {
        Self::attach(Arc::new(Shared::default()))
    }

    /// Open another execution context over the same values
    pub fn context(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    fn attach(shared: Arc<Shared>) -> Self {
        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        lock(&shared.contexts).push((id, tx.clone()));
        Self { id, shared, tx }
    }

    fn notify_others(&self, key: &str) {
        let change = StoreChange {
            key: Some(key.to_string()),
        };
        for (id, tx) in lock(&self.shared.contexts).iter() {
            if *id != self.id {
                // No subscribers on that context is fine
                let _ = tx.send(change.clone());
            }
        }
    }
}

impl Drop for MemoryTokenStore {
    fn drop(&mut self) {
        lock(&self.shared.contexts).retain(|(id, _)| *id != self.id);
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.shared.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let previous = lock(&self.shared.values).insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.notify_others(key);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let previous = lock(&self.shared.values).remove(key);
        if previous.is_some() {
            self.notify_others(key);
        }
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        let changed: Vec<&str> = {
            let mut values = lock(&self.shared.values);
            entries
                .iter()
                .filter(|(key, value)| {
                    values.insert(key.to_string(), value.to_string()).as_deref() != Some(*value)
                })
                .map(|(key, _)| *key)
                .collect()
        };
        for key in changed {
            self.notify_others(key);
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        let removed: Vec<&str> = {
            let mut values = lock(&self.shared.values);
            keys.iter()
                .filter(|key| values.remove(**key).is_some())
                .copied()
                .collect()
        };
        for key in removed {
            self.notify_others(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);

        store.set(ACCESS_TOKEN_KEY, "abc").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("abc"));

        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_contexts_share_values() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.context();

        tab_a.set(ACCESS_TOKEN_KEY, "shared").unwrap();
        assert_eq!(tab_b.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("shared"));
    }

    #[test]
    fn test_only_other_contexts_are_notified() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.context();
        let mut rx_a = tab_a.subscribe();
        let mut rx_b = tab_b.subscribe();

        tab_a.set(ACCESS_TOKEN_KEY, "t1").unwrap();

        assert_eq!(
            rx_b.try_recv().unwrap(),
            StoreChange {
                key: Some(ACCESS_TOKEN_KEY.to_string())
            }
        );
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_unchanged_writes_are_silent() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.context();
        let mut rx_b = tab_b.subscribe();

        tab_a.set(ACCESS_TOKEN_KEY, "t1").unwrap();
        tab_a.set(ACCESS_TOKEN_KEY, "t1").unwrap();
        tab_a.remove("missing").unwrap();

        assert!(rx_b.try_recv().is_ok());
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_pair_visible_together_on_first_notification() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.context();
        let mut rx_b = tab_b.subscribe();

        tab_a
            .set_many(&[(ACCESS_TOKEN_KEY, "a1"), (REFRESH_TOKEN_KEY, "r1")])
            .unwrap();

        rx_b.try_recv().unwrap();
        assert_eq!(tab_b.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
        assert_eq!(tab_b.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));

        tab_a
            .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, "missing"])
            .unwrap();
        assert_eq!(tab_b.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(tab_b.get(REFRESH_TOKEN_KEY).unwrap(), None);
        // Two writes, two removals; the missing key is silent
        let mut seen = 0;
        while rx_b.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_dropped_context_is_unregistered() {
        let tab_a = MemoryTokenStore::new();
        {
            let _tab_b = tab_a.context();
            assert_eq!(lock(&tab_a.shared.contexts).len(), 2);
        }
        assert_eq!(lock(&tab_a.shared.contexts).len(), 1);
    }
}
