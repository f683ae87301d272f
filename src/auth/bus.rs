//! External state invalidation signal
//!
//! Anything that may have changed the stored credentials behind the session
//! controller's back publishes here: the gateway after a refresh or a purge,
//! and the token store forwarder when another context wrote to the store.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::store::TokenStore;

const BUS_CAPACITY: usize = 64;

/// Reason the session state must be re-derived from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// Tokens were replaced by a successful refresh or login
    Refreshed,
    /// Tokens were purged in this process
    Purged,
    /// Another execution context mutated the token store
    StorageChanged,
}

/// Publish/subscribe channel for [`Invalidation`] signals
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    tx: broadcast::Sender<Invalidation>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish a signal, returning how many subscribers received it
    pub fn publish(&self, signal: Invalidation) -> usize {
        log::debug!("Invalidation: {:?}", signal);
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }

    /// Relay the store's cross-context change notifications onto the bus
    pub fn forward_store_changes(&self, store: &Arc<dyn TokenStore>) -> JoinHandle<()> {
        let mut changes = store.subscribe();
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        log::debug!("Store changed in another context: {:?}", change.key);
                        bus.publish(Invalidation::StorageChanged);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} store notifications, resyncing", skipped);
                        bus.publish(Invalidation::StorageChanged);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
