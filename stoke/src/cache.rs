//! A self-expiring cache of the authority's published keys
//!
//! The cache holds at most one [`KeySet`] snapshot. Readers always receive
//! a whole snapshot, shared through an [`Arc`], and a refresh replaces the
//! snapshot in a single atomic store.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use stoke_clock::{Clock, System};
use tokio::sync::Mutex;

use crate::{error::KeyFetchError, KeySet};

/// A source of key sets
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set from the source
    async fn fetch_key_set(&self) -> Result<KeySet, KeyFetchError>;
}

#[async_trait]
impl<S: KeySetSource + ?Sized> KeySetSource for Arc<S> {
    async fn fetch_key_set(&self) -> Result<KeySet, KeyFetchError> {
        S::fetch_key_set(self).await
    }
}

/// Caches a key set until the time it declares as its next update
#[derive(Debug)]
pub struct KeySetCache<S, C = System> {
    source: S,
    clock: C,
    current: ArcSwapOption<KeySet>,
    refresh: Mutex<()>,
}

impl<S: KeySetSource> KeySetCache<S> {
    /// Constructs an empty cache that will fetch from `source` on first use
    pub fn new(source: S) -> Self {
        Self::with_clock(source, System)
    }
}

impl<S, C> KeySetCache<S, C>
where
    S: KeySetSource,
    C: Clock,
{
    /// Constructs an empty cache measuring expiry against `clock`
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            current: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    /// Gets the current keys, fetching them first if the cached set has
    /// expired or `force_refresh` is set
    ///
    /// When many callers find the set expired at once, only the first
    /// fetches; the rest wait for it and share its result.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch was needed and failed. The previous
    /// snapshot, if any, is left in place.
    pub async fn get_keys(&self, force_refresh: bool) -> Result<Arc<KeySet>, KeyFetchError> {
        if !force_refresh {
            if let Some(fresh) = self.fresh_snapshot() {
                return Ok(fresh);
            }
        }

        let _guard = self.refresh.lock().await;

        if !force_refresh {
            if let Some(fresh) = self.fresh_snapshot() {
                return Ok(fresh);
            }
        }

        match self.source.fetch_key_set().await {
            Ok(set) => {
                let set = Arc::new(set);
                self.current.store(Some(Arc::clone(&set)));
                tracing::debug!(
                    jwks.keys = set.len(),
                    jwks.next_update = %set.next_update(),
                    "key set refreshed"
                );
                Ok(set)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "key set refresh failed; keeping previous keys");
                Err(err)
            }
        }
    }

    /// The cached snapshot, whether or not it has expired
    pub fn cached(&self) -> Option<Arc<KeySet>> {
        self.current.load_full()
    }

    /// The underlying key source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The clock used to judge expiry
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn fresh_snapshot(&self) -> Option<Arc<KeySet>> {
        let current = self.current.load_full()?;
        if current.is_stale(self.clock.now()) {
            None
        } else {
            Some(current)
        }
    }
}

#[cfg(feature = "reqwest")]
pub use remote::{RemoteKeySource, RemoteKeySourceBuilder};

#[cfg(feature = "reqwest")]
mod remote {
    #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{
        header::{HeaderMap, HeaderName, HeaderValue},
        Client,
    };

    use super::KeySetSource;
    use crate::{
        error::{ConfigError, KeyFetchError},
        KeySet,
    };

    const USER_AGENT: &str = concat!("stoke/", env!("CARGO_PKG_VERSION"));
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Fetches key sets over HTTP
    #[derive(Debug, Clone)]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub struct RemoteKeySource {
        url: String,
        client: Client,
        timeout: Duration,
    }

    impl RemoteKeySource {
        /// Constructs a source for `url` with default options
        ///
        /// # Errors
        ///
        /// Returns an error if the HTTP client cannot be constructed.
        pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
            Self::builder(url).build()
        }

        /// Starts building a source for `url`
        pub fn builder(url: impl Into<String>) -> RemoteKeySourceBuilder {
            RemoteKeySourceBuilder {
                url: url.into(),
                timeout: DEFAULT_TIMEOUT,
                headers: Vec::new(),
                #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
                root_certificates: Vec::new(),
            }
        }

        /// Constructs a source that uses an existing client
        pub fn with_client(url: impl Into<String>, client: Client) -> Self {
            Self {
                url: url.into(),
                client,
                timeout: DEFAULT_TIMEOUT,
            }
        }

        /// The key set URL
        pub fn url(&self) -> &str {
            &self.url
        }

        /// The timeout applied to each fetch
        pub fn timeout(&self) -> Duration {
            self.timeout
        }
    }

    #[async_trait]
    impl KeySetSource for RemoteKeySource {
        #[tracing::instrument(skip(self), fields(jwks.url = %self.url))]
        async fn fetch_key_set(&self) -> Result<KeySet, KeyFetchError> {
            tracing::debug!("fetching key set");
            let response = self
                .client
                .get(&self.url)
                .timeout(self.timeout)
                .send()
                .await?;

            if let Err(err) = response.error_for_status_ref() {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(
                    error,
                    http.status_code = response.status().as_u16(),
                    "key set fetch failed; unexpected response status",
                );
                return Err(err.into());
            }

            let body = response.bytes().await?;
            let set: KeySet = serde_json::from_slice(&body)?;

            Ok(set)
        }
    }

    /// Options for a [`RemoteKeySource`]
    #[derive(Debug)]
    #[must_use]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub struct RemoteKeySourceBuilder {
        url: String,
        timeout: Duration,
        headers: Vec<(String, String)>,
        #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
        root_certificates: Vec<PathBuf>,
    }

    impl RemoteKeySourceBuilder {
        /// Sets the time allowed for each fetch
        pub fn with_timeout(self, timeout: Duration) -> Self {
            Self { timeout, ..self }
        }

        /// Adds a header sent with every fetch
        pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
            self.headers.push((name.into(), value.into()));
            self
        }

        /// Trusts an additional PEM-encoded root certificate read from `path`
        #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
        #[cfg_attr(docsrs, doc(cfg(any(feature = "rustls-tls", feature = "default-tls"))))]
        pub fn add_root_certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
            self.root_certificates.push(path.into());
            self
        }

        /// Builds the source
        ///
        /// # Errors
        ///
        /// Returns an error if a header is not valid in HTTP, a certificate
        /// cannot be read, or the client cannot be constructed.
        pub fn build(self) -> Result<RemoteKeySource, ConfigError> {
            let mut headers = HeaderMap::with_capacity(self.headers.len());
            for (name, value) in &self.headers {
                let invalid = || ConfigError::InvalidHeader { name: name.clone() };
                let header_name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
                let mut header_value =
                    HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
                header_value.set_sensitive(true);
                headers.append(header_name, header_value);
            }

            let builder = Client::builder()
                .user_agent(USER_AGENT)
                .default_headers(headers);

            #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
            let builder = self
                .root_certificates
                .iter()
                .try_fold(builder, |builder, path| {
                    let pem = std::fs::read(path)?;
                    let cert = reqwest::Certificate::from_pem(&pem).map_err(ConfigError::Client)?;
                    Ok::<_, ConfigError>(builder.add_root_certificate(cert))
                })?;

            let client = builder.build().map_err(ConfigError::Client)?;

            Ok(RemoteKeySource {
                url: self.url,
                client,
                timeout: self.timeout,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use axum::{
            http::StatusCode,
            response::IntoResponse,
            routing::get,
            Json, Router,
        };
        use color_eyre::Result;
        use serde_json::{json, Value};
        use stoke_clock::UnixTime;
        use tracing_test::traced_test;

        use super::*;
        use crate::{
            authority::{Authority, RemoteAuthority},
            jwt::ClaimsValidator,
            test::{self, TestSigner},
        };

        #[test]
        fn builder_keeps_options() -> Result<()> {
            let source = RemoteKeySource::builder("https://auth.example/.well-known/jwks.json")
                .with_timeout(Duration::from_secs(3))
                .with_header("x-api-key", "secret")
                .build()?;

            assert_eq!(source.url(), "https://auth.example/.well-known/jwks.json");
            assert_eq!(source.timeout(), Duration::from_secs(3));
            Ok(())
        }

        #[test]
        fn invalid_header_names_are_rejected() {
            let err = RemoteKeySource::builder("https://auth.example/jwks")
                .with_header("not a header", "value")
                .build()
                .unwrap_err();

            assert!(matches!(err, ConfigError::InvalidHeader { name } if name == "not a header"));
        }

        /// A published key set with padded coordinates and a
        /// nanosecond-precision expiry
        fn published(signers: &[&TestSigner]) -> Value {
            let keys: Vec<Value> = signers
                .iter()
                .map(|signer| {
                    let mut jwk = signer.jwk_json();
                    for coord in ["x", "y"] {
                        if let Some(Value::String(value)) = jwk.get_mut(coord) {
                            value.push('=');
                        }
                    }
                    jwk
                })
                .collect();

            json!({ "exp": "2030-01-01T00:00:00.123456789Z", "keys": keys })
        }

        #[tokio::test]
        async fn fetches_a_published_key_set() -> Result<()> {
            let primary = TestSigner::p256().with_kid("primary");
            let backup = TestSigner::ed25519().with_kid("backup");
            let document = published(&[&primary, &backup]);

            let router = Router::new().route(
                "/jwks",
                get(move |headers: HeaderMap| async move {
                    match headers.get("x-api-key") {
                        Some(key) if key == "secret" => Json(document).into_response(),
                        _ => StatusCode::UNAUTHORIZED.into_response(),
                    }
                }),
            );
            let base = test::serve(router).await;

            let source = RemoteKeySource::builder(format!("{base}/jwks"))
                .with_header("x-api-key", "secret")
                .build()?;
            let set = source.fetch_key_set().await?;

            assert_eq!(set.next_update(), UnixTime(1_893_456_000));
            assert_eq!(set.len(), 2);
            let kids: Vec<_> = set
                .keys()
                .iter()
                .filter_map(|k| k.key_id())
                .map(|k| k.as_str())
                .collect();
            assert_eq!(kids, ["primary", "backup"]);
            assert_eq!(set.keys()[0].material(), primary.key().material());
            assert!(set.keys().iter().all(|k| k.is_signing_key()));

            let err = RemoteKeySource::new(format!("{base}/jwks"))?
                .fetch_key_set()
                .await
                .unwrap_err();
            assert!(matches!(err, KeyFetchError::Request(_)));
            Ok(())
        }

        #[tokio::test]
        async fn verifies_tokens_against_served_keys() -> Result<()> {
            let primary = TestSigner::p256().with_kid("primary");
            let backup = TestSigner::ed25519().with_kid("backup");
            let document = published(&[&primary, &backup]);

            let router = Router::new().route("/jwks", get(move || async move { Json(document) }));
            let base = test::serve(router).await;

            let authority =
                RemoteAuthority::from_url(format!("{base}/jwks"), ClaimsValidator::default())?;
            let token = primary.sign(&json!({ "sub": "alice", "exp": 4_000_000_000u64 }));
            let claims = authority.try_verify(&token).await?;
            assert_eq!(claims.get_str("sub"), Some("alice"));

            let stranger = TestSigner::p256().with_kid("primary");
            let forged = stranger.sign(&json!({ "sub": "mallory" }));
            assert!(authority.verify(&forged).await.is_none());
            Ok(())
        }

        #[tokio::test]
        #[traced_test]
        async fn error_status_is_a_request_error() -> Result<()> {
            let router =
                Router::new().route("/jwks", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
            let base = test::serve(router).await;

            let err = RemoteKeySource::new(format!("{base}/jwks"))?
                .fetch_key_set()
                .await
                .unwrap_err();

            match err {
                KeyFetchError::Request(err) => {
                    assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(logs_contain("unexpected response status"));
            Ok(())
        }

        #[tokio::test]
        async fn malformed_body_is_reported() -> Result<()> {
            let router = Router::new()
                .route("/text", get(|| async { "not json" }))
                .route("/no-exp", get(|| async { Json(json!({ "keys": [] })) }));
            let base = test::serve(router).await;

            for path in ["text", "no-exp"] {
                let err = RemoteKeySource::new(format!("{base}/{path}"))?
                    .fetch_key_set()
                    .await
                    .unwrap_err();
                assert!(matches!(err, KeyFetchError::MalformedDocument(_)), "{path}: {err:?}");
            }
            Ok(())
        }

        #[tokio::test]
        async fn unreachable_source_is_a_fetch_error() -> Result<()> {
            let source = RemoteKeySource::builder("http://127.0.0.1:1/jwks")
                .with_timeout(Duration::from_secs(2))
                .build()?;

            let err = source.fetch_key_set().await.unwrap_err();
            assert!(matches!(err, KeyFetchError::Request(_)));
            Ok(())
        }
    }
}
