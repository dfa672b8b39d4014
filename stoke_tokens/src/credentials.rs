//! Credentials that refresh themselves before they expire

use std::{sync::Arc, time::Duration};

use http::{header, HeaderValue};
use serde::{Deserialize, Serialize};
use stoke_clock::{Clock, DurationSecs, System, UnixTime};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    endpoint::{TokenEndpoint, TokenPair, TokenRequestError},
    expiry::expires_from_token,
    AccessToken, AccessTokenRef, PasswordRef, RefreshToken, UsernameRef,
};

const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// The tokens currently held by a [`CredentialRefresher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialState {
    /// The access token presented on outbound calls
    pub token: AccessToken,

    /// The refresh token, empty when none is held
    pub refresh: RefreshToken,

    /// Where to exchange the refresh token
    pub refresh_url: Option<String>,

    /// When the access token expires
    pub expiry: UnixTime,

    /// How long before expiry to start refreshing
    pub refresh_window: DurationSecs,
}

impl CredentialState {
    /// Whether a refresh token and a URL to use it with are both held
    pub fn is_refreshable(&self) -> bool {
        !self.refresh.as_str().is_empty() && self.refresh_url.is_some()
    }

    /// The time from which a refresh should be attempted
    pub fn refresh_after(&self) -> UnixTime {
        self.expiry - self.refresh_window
    }

    /// Whether the tokens should be refreshed at `now`
    pub fn needs_refresh(&self, now: UnixTime) -> bool {
        self.is_refreshable() && now >= self.refresh_after()
    }
}

/// A bearer credential ready to attach to an outbound call
#[derive(Clone, Debug)]
#[must_use]
pub struct CallCredentials {
    token: AccessToken,
}

impl CallCredentials {
    /// Wraps an access token
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// The access token
    pub fn token(&self) -> &AccessTokenRef {
        &self.token
    }

    /// Whether the access token is empty, as after a failed exchange
    pub fn is_empty(&self) -> bool {
        self.token.as_str().is_empty()
    }

    /// The `Authorization` header value, marked as sensitive
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains characters not permitted in
    /// a header.
    pub fn authorization(&self) -> Result<HeaderValue, header::InvalidHeaderValue> {
        let mut value = HeaderValue::try_from(format!("Bearer {}", self.token.as_str()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Sets the `Authorization` header of a request
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains characters not permitted in
    /// a header.
    pub fn apply<B>(&self, request: &mut http::Request<B>) -> Result<(), header::InvalidHeaderValue> {
        let value = self.authorization()?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }

    /// Adds the bearer credential to a `reqwest` request
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(self.token.as_str())
    }
}

/// Options for a [`CredentialRefresher`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefresherConfig {
    /// How long before expiry to start refreshing
    #[serde(default = "default_refresh_window")]
    pub refresh_window: DurationSecs,

    /// Time allowed for each exchange with the endpoint
    #[serde(default = "default_timeout")]
    pub timeout: DurationSecs,
}

fn default_refresh_window() -> DurationSecs {
    DurationSecs(5)
}

fn default_timeout() -> DurationSecs {
    DurationSecs(30)
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            refresh_window: default_refresh_window(),
            timeout: default_timeout(),
        }
    }
}

#[cfg(feature = "reqwest")]
impl RefresherConfig {
    /// Builds a refresher that talks to its endpoints over HTTP
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn build(
        &self,
        token: AccessToken,
    ) -> Result<CredentialRefresher<crate::HttpTokenEndpoint>, reqwest::Error> {
        let endpoint = crate::HttpTokenEndpoint::new(self.timeout.into())?;
        Ok(CredentialRefresher::new(endpoint, token).with_refresh_window(self.refresh_window))
    }
}

/// Holds an access token and refreshes it shortly before it expires
///
/// The check, the exchange, and the replacement of the tokens all happen
/// under one lock, so concurrent callers never see a half-updated state
/// and never trigger more than one exchange.
#[derive(Debug)]
pub struct CredentialRefresher<E, C = System> {
    endpoint: E,
    clock: C,
    state: Mutex<CredentialState>,
}

impl<E: TokenEndpoint> CredentialRefresher<E> {
    /// Holds `token`, which can be empty if [`login`][Self::login] will be
    /// called before use
    pub fn new(endpoint: E, token: AccessToken) -> Self {
        Self::with_clock(endpoint, System, token)
    }
}

impl<E, C> CredentialRefresher<E, C>
where
    E: TokenEndpoint,
    C: Clock,
{
    /// Holds `token`, measuring expiry against `clock`
    pub fn with_clock(endpoint: E, clock: C, token: AccessToken) -> Self {
        let expiry = expires_from_token(token.as_str(), &clock);
        Self {
            endpoint,
            clock,
            state: Mutex::new(CredentialState {
                token,
                refresh: RefreshToken::from_static(""),
                refresh_url: None,
                expiry,
                refresh_window: default_refresh_window(),
            }),
        }
    }

    /// Sets the refresh token
    pub fn with_refresh_token(mut self, refresh: RefreshToken) -> Self {
        self.state.get_mut().refresh = refresh;
        self
    }

    /// Sets the URL to exchange the refresh token at
    ///
    /// An empty URL disables refreshing.
    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.state.get_mut().refresh_url = if url.is_empty() { None } else { Some(url) };
        self
    }

    /// Sets how long before expiry to start refreshing
    pub fn with_refresh_window(mut self, window: DurationSecs) -> Self {
        self.state.get_mut().refresh_window = window;
        self
    }

    /// A snapshot of the held tokens
    pub async fn state(&self) -> CredentialState {
        self.state.lock().await.clone()
    }

    /// Produces a credential for an outbound call, refreshing first if the
    /// access token is about to expire
    ///
    /// A failed refresh is logged and leaves empty tokens in place, so the
    /// returned credential is empty.
    pub async fn call_credentials(&self) -> CallCredentials {
        let mut state = self.state.lock().await;
        if state.needs_refresh(self.clock.now()) {
            let _ = self.refresh_locked(&mut state).await;
        }
        CallCredentials::new(state.token.clone())
    }

    /// Exchanges the refresh token for new tokens, regardless of expiry
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::NotRefreshable`] if no refresh token or
    /// URL is held, leaving the tokens untouched. Any other error means the
    /// exchange failed and the tokens have been emptied.
    pub async fn refresh(&self) -> Result<(), TokenRequestError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Logs in at `{base_url}/api/login` and remembers
    /// `{base_url}/api/refresh` for later refreshes
    ///
    /// # Errors
    ///
    /// Returns an error if the login failed. The tokens are emptied.
    #[tracing::instrument(skip(self, password), fields(login.base_url = %base_url))]
    pub async fn login(
        &self,
        base_url: &str,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<(), TokenRequestError> {
        let mut state = self.state.lock().await;
        state.refresh_url = Some(format!("{base_url}/api/refresh"));

        let result = self
            .endpoint
            .login(&format!("{base_url}/api/login"), username, password)
            .await;
        self.replace_tokens(&mut state, result)
    }

    async fn refresh_locked(&self, state: &mut CredentialState) -> Result<(), TokenRequestError> {
        let url = match &state.refresh_url {
            Some(url) if !state.refresh.as_str().is_empty() => url.clone(),
            _ => return Err(TokenRequestError::NotRefreshable),
        };

        tracing::debug!(credentials.expiry = %state.expiry, "refreshing credentials");
        let result = self
            .endpoint
            .refresh(&url, &state.token, &state.refresh)
            .await;
        self.replace_tokens(state, result)
    }

    fn replace_tokens(
        &self,
        state: &mut CredentialState,
        result: Result<TokenPair, TokenRequestError>,
    ) -> Result<(), TokenRequestError> {
        let (pair, outcome) = match result {
            Ok(pair) => (pair, Ok(())),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "token exchange failed; discarding held tokens");
                (TokenPair::empty(), Err(err))
            }
        };

        state.expiry = expires_from_token(pair.token.as_str(), &self.clock);
        state.token = pair.token;
        state.refresh = pair.refresh;

        if outcome.is_ok() {
            tracing::debug!(credentials.expiry = %state.expiry, "credentials replaced");
        }
        outcome
    }
}

impl<E, C> CredentialRefresher<E, C>
where
    E: TokenEndpoint + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Spawns a task that refreshes the tokens shortly before each expiry
    ///
    /// The task ends once no refresh token or refresh URL is held, such as
    /// after a failed exchange.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let refresh_after = {
                    let state = this.state.lock().await;
                    if !state.is_refreshable() {
                        tracing::debug!("no refresh token held; stopping background refresh");
                        break;
                    }
                    state.refresh_after()
                };

                let delay = Duration::from(refresh_after.saturating_duration_since(this.clock.now()));
                tokio::time::sleep(delay.max(MIN_REFRESH_DELAY)).await;

                let _ = this.call_credentials().await;
            }
        })
    }
}
