//! Admin backend client

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::auth::Invalidation;
use crate::error::Result;

pub mod gateway;
#[cfg(test)]
pub mod mock;
pub mod models;

pub use gateway::RequestGateway;
#[cfg(test)]
pub use mock::MockAuthApi;
pub use models::{RequestOptions, TokenPair};

/// Session operations the session controller drives.
///
/// Implemented by [`RequestGateway`]; the controller never touches the token
/// store for writing, it goes through these calls.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Current access token, if any
    fn access_token(&self) -> Result<Option<String>>;

    /// Run the (coalesced) refresh protocol. Tokens are purged on failure.
    async fn refresh(&self) -> Result<TokenPair>;

    /// External authorization URL to start a login
    async fn authorization_url(&self) -> Result<String>;

    /// Finish a login from the OAuth callback parameters
    async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenPair>;

    /// Best-effort backend logout
    async fn logout_remote(&self) -> Result<()>;

    /// Remove stored credentials; returns true if any were present
    fn purge(&self) -> bool;

    /// Signals that stored credentials changed
    fn invalidations(&self) -> broadcast::Receiver<Invalidation>;
}

#[async_trait]
impl AuthApi for RequestGateway {
    fn access_token(&self) -> Result<Option<String>> {
        RequestGateway::access_token(self)
    }

    async fn refresh(&self) -> Result<TokenPair> {
        RequestGateway::refresh(self).await
    }

    async fn authorization_url(&self) -> Result<String> {
        RequestGateway::authorization_url(self).await
    }

    async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenPair> {
        RequestGateway::exchange_code(self, code, state).await
    }

    async fn logout_remote(&self) -> Result<()> {
        RequestGateway::logout_remote(self).await
    }

    fn purge(&self) -> bool {
        RequestGateway::purge(self)
    }

    fn invalidations(&self) -> broadcast::Receiver<Invalidation> {
        self.bus().subscribe()
    }
}
