//! Reactive session state
//!
//! The [`SessionController`] owns the `{is_authenticated, is_admin,
//! is_loading}` triple and publishes it through a `watch` channel. The state
//! is never stored independently of the tokens: every transition re-derives
//! it from whatever the token store holds right now, so a refresh done by the
//! gateway or a write made by another process converges to the same answer.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::auth::{Navigator, decode, redirect_to_login};
use crate::client::AuthApi;
use crate::config::SessionSettings;
use crate::error::Result;

/// Observable session flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub is_admin: bool,
    /// True only until the first check completes
    pub is_loading: bool,
}

impl SessionState {
    /// State before the initial check
    pub const INITIAL: SessionState = SessionState {
        is_authenticated: false,
        is_admin: false,
        is_loading: true,
    };

    pub const SIGNED_OUT: SessionState = SessionState {
        is_authenticated: false,
        is_admin: false,
        is_loading: false,
    };

    pub fn signed_in(is_admin: bool) -> Self {
        SessionState {
            is_authenticated: true,
            is_admin,
            is_loading: false,
        }
    }
}

/// Keeps [`SessionState`] in sync with the stored credentials
pub struct SessionController<A: AuthApi + ?Sized> {
    api: Arc<A>,
    navigator: Arc<dyn Navigator>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
}

impl<A: AuthApi + ?Sized> SessionController<A> {
    pub fn new(api: Arc<A>, navigator: Arc<dyn Navigator>, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(SessionState::INITIAL);
        Self {
            api,
            navigator,
            settings,
            state,
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Initial check; ends the loading phase
    pub async fn initialize(&self) -> SessionState {
        let next = self.derive_state().await;
        self.transition(next);
        next
    }

    /// Re-derive state after an invalidation signal
    pub async fn resync(&self) -> SessionState {
        self.initialize().await
    }

    /// Periodic expiry check: refresh ahead of expiry so requests never see a
    /// 401 in the first place
    pub async fn tick(&self) {
        let Some(token) = self.current_token() else {
            return;
        };

        let Some(claims) = decode(&token) else {
            log::debug!("Stored access token is undecodable, resyncing");
            self.resync().await;
            return;
        };

        let left = claims.time_to_expiry(Utc::now());
        let threshold = chrono::Duration::from_std(self.settings.refresh_threshold())
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        if left <= chrono::Duration::zero() {
            log::debug!("Access token expired, refreshing now");
        } else if left < threshold {
            log::debug!(
                "Access token expires in {}s, refreshing proactively",
                left.num_seconds()
            );
        } else {
            return;
        }

        let next = self.refreshed_state().await;
        self.transition(next);
    }

    /// Start a login by sending the user to the backend's authorization URL.
    /// State changes only once the callback completes.
    pub async fn login(&self) -> Result<String> {
        let url = self.api.authorization_url().await?;
        self.navigator.navigate(&url);
        Ok(url)
    }

    /// Finish a login with the OAuth callback parameters
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<SessionState> {
        self.api.exchange_code(code, state).await?;
        Ok(self.resync().await)
    }

    /// End the session locally, whatever the backend says
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout_remote().await {
            log::warn!("Backend logout failed, signing out locally: {}", e);
        }
        self.api.purge();
        self.transition(SessionState::SIGNED_OUT);
        redirect_to_login(self.navigator.as_ref());
    }

    /// Drive the controller until `shutdown` resolves: initial check, then
    /// periodic ticks and resyncs on every invalidation signal
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut invalidations = self.api.invalidations();
        self.initialize().await;

        let mut ticker = tokio::time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the initial check just ran
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
                signal = invalidations.recv() => match signal {
                    Ok(signal) => {
                        log::debug!("Resyncing session after {:?}", signal);
                        self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn current_token(&self) -> Option<String> {
        match self.api.access_token() {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Failed to read access token: {}", e);
                None
            }
        }
    }

    async fn derive_state(&self) -> SessionState {
        let Some(token) = self.current_token() else {
            return SessionState::SIGNED_OUT;
        };

        match decode(&token) {
            Some(claims) if claims.is_valid_at(Utc::now()) => SessionState::signed_in(claims.is_admin),
            _ => {
                log::debug!("Stored access token expired or undecodable, refreshing");
                self.refreshed_state().await
            }
        }
    }

    async fn refreshed_state(&self) -> SessionState {
        match self.api.refresh().await {
            // A fresh token the client cannot read is still a session; it just
            // grants no admin view
            Ok(pair) => SessionState::signed_in(
                decode(&pair.access_token).is_some_and(|claims| claims.is_admin),
            ),
            Err(e) => {
                log::debug!("Session refresh failed: {}", e);
                self.api.purge();
                SessionState::SIGNED_OUT
            }
        }
    }

    /// The only place state changes. Never re-enters the loading phase.
    fn transition(&self, next: SessionState) -> bool {
        let next = SessionState {
            is_loading: false,
            ..next
        };
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            log::debug!("Session state {:?} -> {:?}", current, next);
            *current = next;
            true
        })
    }
}
