//! Mock session API for testing
//!
//! Provides a mock implementation of [`AuthApi`] so the session controller
//! can be tested without a backend.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::AuthApi;
use super::models::TokenPair;
use crate::auth::{Invalidation, InvalidationBus};
use crate::error::{ApiError, Result};

/// Mock session API.
///
/// # Example
/// ```ignore
/// let mock = MockAuthApi::new()
///     .with_access_token(&expired)
///     .with_refresh(Ok(TokenPair { access_token: fresh, refresh_token: None }));
///
/// controller.initialize().await;
/// assert_eq!(mock.call_counts().refresh, 1);
/// ```
#[derive(Clone, Default)]
pub struct MockAuthApi {
    /// Stored access token
    access_token: Arc<Mutex<Option<String>>>,
    /// Outcomes returned by successive refresh calls
    refreshes: Arc<Mutex<VecDeque<std::result::Result<TokenPair, ApiError>>>>,
    /// URL returned from authorization_url
    authorization_url: Arc<Mutex<Option<String>>>,
    /// Error returned from logout_remote, if any
    logout_error: Arc<Mutex<Option<ApiError>>>,
    /// Track number of calls for verification
    call_count: Arc<Mutex<CallCounts>>,
    bus: InvalidationBus,
}

/// Tracks API call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub refresh: usize,
    pub authorization_url: usize,
    pub exchange_code: usize,
    pub logout_remote: usize,
    pub purge: usize,
}

impl CallCounts {
    /// Calls that would have reached the network
    pub fn network(&self) -> usize {
        self.refresh + self.authorization_url + self.exchange_code + self.logout_remote
    }
}

impl MockAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored access token
    pub fn with_access_token(self, token: &str) -> Self {
        *self.access_token.lock().unwrap() = Some(token.to_string());
        self
    }

    /// Queue the outcome of the next refresh call
    pub fn with_refresh(self, outcome: std::result::Result<TokenPair, ApiError>) -> Self {
        self.refreshes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn with_authorization_url(self, url: &str) -> Self {
        *self.authorization_url.lock().unwrap() = Some(url.to_string());
        self
    }

    pub fn with_logout_error(self, error: ApiError) -> Self {
        *self.logout_error.lock().unwrap() = Some(error);
        self
    }

    pub fn call_counts(&self) -> CallCounts {
        self.call_count.lock().unwrap().clone()
    }

    pub fn stored_access_token(&self) -> Option<String> {
        self.access_token.lock().unwrap().clone()
    }

    /// Simulate another context writing the store
    pub fn replace_externally(&self, token: Option<&str>) {
        *self.access_token.lock().unwrap() = token.map(str::to_string);
        self.bus.publish(Invalidation::StorageChanged);
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.access_token.lock().unwrap().clone())
    }

    async fn refresh(&self) -> Result<TokenPair> {
        self.call_count.lock().unwrap().refresh += 1;
        let outcome = self
            .refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::session_ended("No refresh token available")));

        match outcome {
            Ok(pair) => {
                *self.access_token.lock().unwrap() = Some(pair.access_token.clone());
                self.bus.publish(Invalidation::Refreshed);
                Ok(pair)
            }
            Err(err) => {
                self.purge();
                Err(err.into())
            }
        }
    }

    async fn authorization_url(&self) -> Result<String> {
        self.call_count.lock().unwrap().authorization_url += 1;
        self.authorization_url
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::InvalidResponse("no authorization_url".to_string()).into())
    }

    async fn exchange_code(&self, code: &str, _state: &str) -> Result<TokenPair> {
        self.call_count.lock().unwrap().exchange_code += 1;
        let pair = TokenPair {
            access_token: code.to_string(),
            refresh_token: Some(format!("refresh-for-{}", code)),
        };
        *self.access_token.lock().unwrap() = Some(pair.access_token.clone());
        self.bus.publish(Invalidation::Refreshed);
        Ok(pair)
    }

    async fn logout_remote(&self) -> Result<()> {
        self.call_count.lock().unwrap().logout_remote += 1;
        match self.logout_error.lock().unwrap().take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn purge(&self) -> bool {
        self.call_count.lock().unwrap().purge += 1;
        let had = self.access_token.lock().unwrap().take().is_some();
        if had {
            self.bus.publish(Invalidation::Purged);
        }
        had
    }

    fn invalidations(&self) -> broadcast::Receiver<Invalidation> {
        self.bus.subscribe()
    }
}
