//! Authenticated request gateway
//!
//! Every backend call goes through [`RequestGateway::request`], which attaches
//! the stored bearer token and repairs an expired session on the fly: a 401
//! triggers one refresh of the credential pair followed by exactly one retry
//! of the original call.
//!
//! Concurrent 401s never start parallel refreshes. The first one begins a
//! refresh *episode* and every other caller awaits the same shared future, so
//! the refresh call, the token write, the broadcast, and (on failure) the
//! purge and login redirect each happen once per episode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::models::{
    AuthorizationUrl, Envelope, MaybeEnveloped, RequestOptions, TokenPair, TokenResponse,
};
use crate::auth::{Invalidation, InvalidationBus, Navigator, redirect_to_login};
use crate::config::Config;
use crate::error::{ApiError, ConfigError, Result};
use crate::store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, StoreResult, TokenStore};

pub const LOGIN_URL_PATH: &str = "/api/auth/discord/login";
pub const CALLBACK_PATH: &str = "/api/auth/discord/callback";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

type RefreshResult = std::result::Result<TokenPair, ApiError>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

/// Progress of a single gateway request
#[derive(Debug)]
enum RequestPhase {
    Sending,
    AwaitingRefresh {
        sent_token: Option<String>,
        status: StatusCode,
        body: Option<String>,
    },
    Retrying,
    Done(Response),
    Failed(ApiError),
}

impl RequestPhase {
    fn name(&self) -> &'static str {
        match self {
            RequestPhase::Sending => "sending",
            RequestPhase::AwaitingRefresh { .. } => "awaiting refresh",
            RequestPhase::Retrying => "retrying",
            RequestPhase::Done(_) => "done",
            RequestPhase::Failed(_) => "failed",
        }
    }
}

/// What a 401'd request should do next
enum Join {
    /// The token was already replaced; retry with the current one
    Retry,
    /// The session was purged meanwhile
    Ended,
    /// Wait for the in-flight (or newly started) refresh episode
    Wait(RefreshFuture),
}

/// Outcome of a failed refresh episode
enum Settled {
    /// Another context stored a new pair meanwhile
    Rotated(TokenPair),
    /// Tokens were removed by this episode
    Purged,
    /// A purge already ended the session
    SessionEnded,
}

struct Episode {
    id: u64,
    future: RefreshFuture,
}

struct Inner {
    http: HttpClient,
    base_url: String,
    tunnel_header: HeaderName,
    store: Arc<dyn TokenStore>,
    bus: InvalidationBus,
    navigator: Arc<dyn Navigator>,
    /// Bumped by every purge; a refresh that started in an older epoch must
    /// not write tokens
    epoch: AtomicU64,
    /// Serializes purges with the epoch-check-then-persist of a refresh
    write_lock: Mutex<()>,
    in_flight: Mutex<Option<Episode>>,
    next_episode: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Backend client that owns the refresh protocol and all token writes
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl RequestGateway {
    /// Create a gateway for the backend described by `config`
    pub fn new(
        config: &Config,
        store: Arc<dyn TokenStore>,
        bus: InvalidationBus,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let tunnel_header = HeaderName::from_bytes(config.tunnel_header.as_bytes())
            .map_err(|e| ConfigError::Invalid(format!("tunnel_header: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.api_base_url.trim_end_matches('/').to_string(),
                tunnel_header,
                store,
                bus,
                navigator,
                epoch: AtomicU64::new(0),
                write_lock: Mutex::new(()),
                in_flight: Mutex::new(None),
                next_episode: AtomicU64::new(1),
            }),
        })
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.inner.bus
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Result<Option<String>> {
        Ok(self.inner.store.get(ACCESS_TOKEN_KEY)?)
    }

    /// Issue a request and parse the 2xx body as `T`.
    ///
    /// A 204 (or an empty 2xx body) is parsed from JSON `null`, so use `()`,
    /// `Option<_>` or [`Value`] for endpoints without content.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.execute(path, &options).await?;
        parse_body(response).await
    }

    /// Fetch a resource endpoint and return its envelope
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Envelope<T>> {
        self.request(path, options).await
    }

    /// Run the refresh protocol outside of a request.
    ///
    /// Joins the in-flight episode if there is one. On failure the stored
    /// tokens have been purged.
    pub async fn refresh(&self) -> Result<TokenPair> {
        let episode = self.inner.join_or_begin_episode();
        Ok(episode.await?)
    }

    /// Ask the backend where to send the user to sign in
    pub async fn authorization_url(&self) -> Result<String> {
        let url: MaybeEnveloped<AuthorizationUrl> = self.request(LOGIN_URL_PATH, RequestOptions::new()).await?;
        Ok(url.into_inner().authorization_url)
    }

    /// Complete the OAuth callback and store the issued credentials
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenPair> {
        let options = RequestOptions::new()
            .query("code", code)
            .query("state", state);
        let response: MaybeEnveloped<TokenResponse> = self.request(CALLBACK_PATH, options).await?;
        let pair = response.into_inner().into_pair().ok_or_else(|| {
            ApiError::InvalidResponse("Login callback returned no access token".to_string())
        })?;

        self.inner.persist(&pair)?;
        log::debug!("Stored credentials from login callback");
        self.inner.bus.publish(Invalidation::Refreshed);
        Ok(pair)
    }

    /// Tell the backend the session is over. The body is ignored.
    pub async fn logout_remote(&self) -> Result<()> {
        self.execute(LOGOUT_PATH, &RequestOptions::new().method(Method::POST))
            .await?;
        Ok(())
    }

    /// Remove both tokens. Any refresh in flight will not write its result.
    /// Returns true if there was anything to remove.
    pub fn purge(&self) -> bool {
        self.inner.purge()
    }

    async fn execute(&self, path: &str, options: &RequestOptions) -> Result<Response> {
        let mut phase = RequestPhase::Sending;
        loop {
            log::debug!("{} {}: {}", options.method, path, phase.name());
            phase = match phase {
                RequestPhase::Sending => {
                    let token = self.access_token()?;
                    let response = self.inner.send(path, options, token.as_deref()).await?;
                    if response.status() == StatusCode::UNAUTHORIZED {
                        let status = response.status();
                        let body = response.text().await.ok();
                        RequestPhase::AwaitingRefresh {
                            sent_token: token,
                            status,
                            body,
                        }
                    } else {
                        RequestPhase::Done(response)
                    }
                }
                RequestPhase::AwaitingRefresh {
                    sent_token,
                    status,
                    body,
                } => match self.inner.join_after_unauthorized(sent_token.as_deref())? {
                    Join::Retry => RequestPhase::Retrying,
                    Join::Ended => RequestPhase::Failed(ApiError::Authentication {
                        status,
                        message: "Session ended while the request was in flight".to_string(),
                        body,
                    }),
                    Join::Wait(episode) => match episode.await {
                        Ok(_) => RequestPhase::Retrying,
                        Err(err) => RequestPhase::Failed(with_original_response(err, status, body)),
                    },
                },
                RequestPhase::Retrying => {
                    // The retry is final: a second 401 is not refreshed again
                    let token = self.access_token()?;
                    RequestPhase::Done(self.inner.send(path, options, token.as_deref()).await?)
                }
                RequestPhase::Done(response) => return check_status(response).await,
                RequestPhase::Failed(err) => return Err(err.into()),
            };
        }
    }
}

impl Inner {
    fn default_headers(&self, token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(self.tunnel_header.clone(), HeaderValue::from_static("true"));
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => log::warn!("Stored access token is not a valid header value, omitting"),
            }
        }
        headers
    }

    async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response> {
        let mut headers = self.default_headers(token);
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(options.method.clone(), &url)
            .headers(headers);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        Ok(request.send().await.map_err(ApiError::from)?)
    }

    fn persist(&self, pair: &TokenPair) -> StoreResult<()> {
        match &pair.refresh_token {
            Some(refresh_token) => self.store.set_many(&[
                (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
                (REFRESH_TOKEN_KEY, refresh_token.as_str()),
            ]),
            None => self.store.set(ACCESS_TOKEN_KEY, &pair.access_token),
        }
    }

    fn purge(&self) -> bool {
        let had_tokens = {
            let _guard = lock(&self.write_lock);
            self.clear_tokens()
        };

        if had_tokens {
            self.bus.publish(Invalidation::Purged);
        }
        had_tokens
    }

    /// End the epoch and remove both tokens. Caller holds `write_lock`.
    fn clear_tokens(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let mut had_tokens = false;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            match self.store.get(key) {
                Ok(value) => had_tokens |= value.is_some(),
                Err(e) => log::warn!("Failed to read {} during purge: {}", key, e),
            }
        }
        if let Err(e) = self.store.remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY]) {
            log::warn!("Failed to remove stored tokens: {}", e);
        }
        if had_tokens {
            log::debug!("Purged stored tokens");
        }
        had_tokens
    }

    /// Decide what a failed refresh leaves behind. Another context may have
    /// rotated the pair while the stale refresh token was being rejected; its
    /// tokens are kept and adopted instead of purged.
    fn settle_failed_refresh(&self, epoch: u64, sent_refresh: Option<&str>) -> Settled {
        let guard = lock(&self.write_lock);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Settled::SessionEnded;
        }

        let stored_refresh = self.store.get(REFRESH_TOKEN_KEY).ok().flatten();
        if stored_refresh.is_some() && stored_refresh.as_deref() != sent_refresh {
            if let Ok(Some(access_token)) = self.store.get(ACCESS_TOKEN_KEY) {
                return Settled::Rotated(TokenPair {
                    access_token,
                    refresh_token: stored_refresh,
                });
            }
        }

        let had_tokens = self.clear_tokens();
        drop(guard);
        if had_tokens {
            self.bus.publish(Invalidation::Purged);
        }
        Settled::Purged
    }

    /// Decide how a request that got a 401 with `sent_token` continues
    fn join_after_unauthorized(self: &Arc<Self>, sent_token: Option<&str>) -> Result<Join> {
        let mut slot = lock(&self.in_flight);

        let current = self.store.get(ACCESS_TOKEN_KEY)?;
        if current.as_deref() != sent_token {
            return Ok(match current {
                Some(_) => Join::Retry,
                None => Join::Ended,
            });
        }

        if let Some(episode) = slot.as_ref() {
            log::debug!("Joining refresh episode {}", episode.id);
            return Ok(Join::Wait(episode.future.clone()));
        }

        Ok(Join::Wait(self.begin_episode(&mut slot)))
    }

    fn join_or_begin_episode(self: &Arc<Self>) -> RefreshFuture {
        let mut slot = lock(&self.in_flight);
        match slot.as_ref() {
            Some(episode) => episode.future.clone(),
            None => self.begin_episode(&mut slot),
        }
    }

    /// Snapshot the epoch and refresh token, then park the episode in `slot`.
    /// The future does nothing until a caller awaits it.
    fn begin_episode(self: &Arc<Self>, slot: &mut Option<Episode>) -> RefreshFuture {
        let id = self.next_episode.fetch_add(1, Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY);

        let future = Arc::clone(self)
            .run_episode(id, epoch, refresh_token)
            .boxed()
            .shared();
        *slot = Some(Episode {
            id,
            future: future.clone(),
        });
        future
    }

    async fn run_episode(
        self: Arc<Self>,
        id: u64,
        epoch: u64,
        refresh_token: StoreResult<Option<String>>,
    ) -> RefreshResult {
        log::debug!("Refresh episode {} started", id);

        let sent_refresh = refresh_token.as_ref().ok().cloned().flatten();
        let outcome = match refresh_token {
            Ok(Some(token)) => self.call_refresh(&token).await,
            Ok(None) => Err(ApiError::session_ended("No refresh token available")),
            Err(e) => Err(ApiError::session_ended(format!(
                "Token store unavailable: {}",
                e
            ))),
        };

        let result = match outcome {
            Ok(pair) => self.commit_refresh(id, epoch, pair),
            Err(err) => {
                log::debug!("Refresh episode {} failed: {}", id, err);
                match self.settle_failed_refresh(epoch, sent_refresh.as_deref()) {
                    Settled::Rotated(pair) => {
                        log::debug!(
                            "Refresh episode {} superseded by tokens from another context",
                            id
                        );
                        Ok(pair)
                    }
                    Settled::Purged => {
                        redirect_to_login(self.navigator.as_ref());
                        Err(err)
                    }
                    Settled::SessionEnded => Err(err),
                }
            }
        };

        let mut slot = lock(&self.in_flight);
        if slot.as_ref().is_some_and(|episode| episode.id == id) {
            *slot = None;
        }
        result
    }

    fn commit_refresh(&self, id: u64, epoch: u64, pair: TokenPair) -> RefreshResult {
        {
            let _guard = lock(&self.write_lock);
            if self.epoch.load(Ordering::SeqCst) != epoch {
                log::debug!(
                    "Session ended during refresh episode {}, discarding new tokens",
                    id
                );
                return Err(ApiError::session_ended("Session ended during token refresh"));
            }
            if let Err(e) = self.persist(&pair) {
                log::warn!("Failed to persist refreshed tokens: {}", e);
                drop(_guard);
                self.purge();
                return Err(ApiError::session_ended(format!(
                    "Failed to store refreshed tokens: {}",
                    e
                )));
            }
        }

        log::debug!("Refresh episode {} stored new tokens", id);
        self.bus.publish(Invalidation::Refreshed);
        Ok(pair)
    }

    async fn call_refresh(&self, refresh_token: &str) -> RefreshResult {
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        let response = self
            .http
            .post(&url)
            .headers(self.default_headers(None))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| {
                ApiError::session_ended(format!("Token refresh failed: {}", ApiError::from(e)))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::Authentication {
                status,
                message: extract_message(&body)
                    .unwrap_or_else(|| format!("Token refresh rejected ({})", status)),
                body: Some(body),
            });
        }

        serde_json::from_str::<MaybeEnveloped<TokenResponse>>(&body)
            .ok()
            .and_then(|parsed| parsed.into_inner().into_pair())
            .ok_or(ApiError::Authentication {
                status,
                message: "Token refresh response did not include an access token".to_string(),
                body: Some(body),
            })
    }
}

/// Report a refresh failure against the 401 that triggered it
fn with_original_response(err: ApiError, status: StatusCode, body: Option<String>) -> ApiError {
    match err {
        ApiError::Authentication { message, .. } => ApiError::Authentication {
            status,
            message,
            body,
        },
        other => other,
    }
}

/// Human-readable message from an error body
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"]
        .iter()
        .filter_map(|field| value.get(*field).and_then(Value::as_str))
        .find(|msg| !msg.trim().is_empty())
        .map(str::to_string)
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

/// Map a non-2xx response to its error kind
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.ok();
    let message = body.as_deref().and_then(extract_message);

    Err(match status {
        StatusCode::UNAUTHORIZED => ApiError::Authentication {
            status,
            message: message.unwrap_or_else(|| status_text(status)),
            body,
        },
        StatusCode::FORBIDDEN => ApiError::Authorization {
            status,
            message: message.unwrap_or_else(|| {
                "You do not have permission to perform this action".to_string()
            }),
            body,
        },
        _ => ApiError::Request {
            status,
            message: message.unwrap_or_else(|| status_text(status)),
            body,
        },
    }
    .into())
}

async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let empty = |e: serde_json::Error| ApiError::InvalidResponse(format!("Empty response: {}", e));

    if response.status() == StatusCode::NO_CONTENT {
        return Ok(serde_json::from_value(Value::Null).map_err(empty)?);
    }

    let bytes = response.bytes().await.map_err(ApiError::from)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null).map_err(empty)?);
    }

    Ok(serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))?)
}
