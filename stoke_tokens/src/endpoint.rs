//! Exchanges with the login and refresh endpoints

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccessToken, AccessTokenRef, PasswordRef, RefreshToken, RefreshTokenRef, UsernameRef};

/// A token pair issued by the login and refresh endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// The access token
    pub token: AccessToken,

    /// The refresh token
    pub refresh: RefreshToken,
}

impl TokenPair {
    /// A pair of empty tokens, held after a failed exchange
    pub fn empty() -> Self {
        Self {
            token: AccessToken::from_static(""),
            refresh: RefreshToken::from_static(""),
        }
    }

    /// Whether both tokens are empty
    pub fn is_empty(&self) -> bool {
        self.token.as_str().is_empty() && self.refresh.as_str().is_empty()
    }
}

/// The body of a login request
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    /// The username
    pub username: &'a UsernameRef,

    /// The password
    pub password: &'a PasswordRef,
}

/// The body of a refresh request
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    /// The refresh token
    pub refresh: &'a RefreshTokenRef,
}

/// An error while requesting tokens from an endpoint
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The endpoint responded with an error status
    #[error("error requesting token from endpoint ({status}): {body}")]
    ErrorWithBody {
        /// The response status
        status: http::StatusCode,
        /// The body of the error
        body: String,
    },

    /// Unable to deserialize the token body
    #[error("error deserializing token body from endpoint")]
    TokenBodyError(#[from] serde_json::Error),

    /// Unable to read the response
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),

    /// Unable to send a token request to the endpoint
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("error sending request to endpoint")]
    RequestSend(#[source] reqwest::Error),

    /// There is no refresh token or refresh URL to refresh with
    #[error("no refresh token or refresh URL available")]
    NotRefreshable,

    /// A custom endpoint failed
    #[error("token endpoint unavailable")]
    Endpoint(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// An endpoint that issues token pairs
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Logs in with a username and password
    async fn login(
        &self,
        url: &str,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<TokenPair, TokenRequestError>;

    /// Exchanges a refresh token for a new token pair
    ///
    /// The current access token is presented as a bearer credential.
    async fn refresh(
        &self,
        url: &str,
        access: &AccessTokenRef,
        refresh: &RefreshTokenRef,
    ) -> Result<TokenPair, TokenRequestError>;
}

#[async_trait]
impl<E: TokenEndpoint + ?Sized> TokenEndpoint for std::sync::Arc<E> {
    async fn login(
        &self,
        url: &str,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<TokenPair, TokenRequestError> {
        E::login(self, url, username, password).await
    }

    async fn refresh(
        &self,
        url: &str,
        access: &AccessTokenRef,
        refresh: &RefreshTokenRef,
    ) -> Result<TokenPair, TokenRequestError> {
        E::refresh(self, url, access, refresh).await
    }
}

#[cfg(feature = "reqwest")]
pub use http_endpoint::HttpTokenEndpoint;

#[cfg(feature = "reqwest")]
mod http_endpoint {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::header;

    use super::{LoginRequest, RefreshRequest, TokenEndpoint, TokenPair, TokenRequestError};
    use crate::{AccessTokenRef, PasswordRef, RefreshTokenRef, UsernameRef};

    const USER_AGENT: &str = concat!("stoke_tokens/", env!("CARGO_PKG_VERSION"));

    /// Requests tokens over HTTP with JSON bodies
    #[derive(Debug, Clone)]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub struct HttpTokenEndpoint {
        client: reqwest::Client,
        timeout: Duration,
    }

    impl HttpTokenEndpoint {
        /// Constructs an endpoint client with the given per-request timeout
        ///
        /// # Errors
        ///
        /// Returns an error if the HTTP client cannot be constructed.
        pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
            let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
            Ok(Self::with_client(client, timeout))
        }

        /// Uses an existing client
        pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
            Self { client, timeout }
        }

        /// The per-request timeout
        pub fn timeout(&self) -> Duration {
            self.timeout
        }

        async fn exchange(
            &self,
            request: reqwest::RequestBuilder,
        ) -> Result<TokenPair, TokenRequestError> {
            let resp = request
                .timeout(self.timeout)
                .send()
                .await
                .map_err(TokenRequestError::RequestSend)?;

            tracing::debug!(
                response.status = resp.status().as_u16(),
                "received token response from endpoint"
            );

            if let Err(error) = resp.error_for_status_ref() {
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .map_err(TokenRequestError::BodyReadError)?;
                let error: &dyn std::error::Error = &error;
                tracing::warn!(error, "token endpoint rejected request");
                return Err(TokenRequestError::ErrorWithBody { status, body });
            }

            let body = resp
                .bytes()
                .await
                .map_err(TokenRequestError::BodyReadError)?;
            let pair: TokenPair = serde_json::from_slice(&body)?;

            tracing::info!("received new tokens");
            Ok(pair)
        }
    }

    #[async_trait]
    impl TokenEndpoint for HttpTokenEndpoint {
        #[tracing::instrument(err, skip(self, password), fields(login.url = %url, login.username = %username))]
        async fn login(
            &self,
            url: &str,
            username: &UsernameRef,
            password: &PasswordRef,
        ) -> Result<TokenPair, TokenRequestError> {
            tracing::trace!("logging in");
            let request = self
                .client
                .post(url)
                .json(&LoginRequest { username, password });
            self.exchange(request).await
        }

        #[tracing::instrument(err, skip(self, access, refresh), fields(refresh.url = %url))]
        async fn refresh(
            &self,
            url: &str,
            access: &AccessTokenRef,
            refresh: &RefreshTokenRef,
        ) -> Result<TokenPair, TokenRequestError> {
            tracing::trace!("refreshing tokens");
            let request = self
                .client
                .post(url)
                .header(header::AUTHORIZATION, format!("Bearer {}", access.as_str()))
                .json(&RefreshRequest { refresh });
            self.exchange(request).await
        }
    }
}
