//! Token verification against an authority's keys
//!
//! An [`Authority`] turns a bearer token into the claims it carries, or
//! nothing at all. Two implementations are provided:
//!
//! * [`RemoteAuthority`] verifies signatures against a cached, remotely
//!   published key set.
//! * [`FixedClaimsAuthority`] skips verification entirely and is meant for
//!   tests and local development.
//!
//! Which one is used is usually decided by an [`AuthorityConfig`].

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use stoke_clock::{Clock, DurationSecs, System};
use tokio::task::JoinHandle;

use crate::{
    cache::{KeySetCache, KeySetSource},
    error::{self, ConfigError, KeyFetchError, KeyRejection, KeyRejectionError, TokenVerificationFailure},
    jwa,
    jwk::VerificationKey,
    jwt::{Claims, ClaimsValidator, Decomposed, JwtRef},
    KeySet,
};

/// Delay before retrying after the key set could not be refreshed
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Shortest delay between scheduled refreshes
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Verifies tokens and produces their claims
#[async_trait]
pub trait Authority: fmt::Debug + Send + Sync {
    /// Verifies the token, explaining any failure
    ///
    /// # Errors
    ///
    /// Returns an error if no keys are available, the token is malformed,
    /// or every key rejected it.
    async fn try_verify(&self, token: &JwtRef) -> Result<Claims, TokenVerificationFailure>;

    /// Verifies the token, returning its claims only if it is acceptable
    ///
    /// Failures are logged and never surfaced to the caller.
    async fn verify(&self, token: &JwtRef) -> Option<Claims> {
        match self.try_verify(token).await {
            Ok(claims) => Some(claims),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(error, "token rejected");
                None
            }
        }
    }
}

#[async_trait]
impl<A: Authority + ?Sized> Authority for Arc<A> {
    async fn try_verify(&self, token: &JwtRef) -> Result<Claims, TokenVerificationFailure> {
        A::try_verify(self, token).await
    }

    async fn verify(&self, token: &JwtRef) -> Option<Claims> {
        A::verify(self, token).await
    }
}

/// Tries each key of the set in order, returning the claims from the
/// first key that accepts the token
///
/// Keys that are not signing keys, or for which no algorithm can be
/// resolved, are skipped. Every rejection is recorded.
///
/// # Errors
///
/// Returns [`TokenVerificationFailure::NoKeyAccepted`] with one entry per
/// key if no key accepts the token.
pub fn verify_with_key_set<C: Clock>(
    keys: &KeySet,
    token: &Decomposed<'_>,
    validator: &ClaimsValidator,
    clock: &C,
) -> Result<Claims, TokenVerificationFailure> {
    let mut rejections = Vec::new();

    for (index, key) in keys.keys().iter().enumerate() {
        match verify_with_key(key, token, validator, clock) {
            Ok(claims) => {
                tracing::trace!(jwks.idx = index, jwk.kid = ?key.key_id(), "token accepted");
                return Ok(claims);
            }
            Err(error) => {
                tracing::trace!(
                    jwks.idx = index,
                    jwk.kid = ?key.key_id(),
                    %error,
                    "key rejected token"
                );
                rejections.push(KeyRejection {
                    index,
                    key_id: key.key_id().map(ToOwned::to_owned),
                    error,
                });
            }
        }
    }

    Err(TokenVerificationFailure::NoKeyAccepted(rejections))
}

fn verify_with_key<C: Clock>(
    key: &VerificationKey,
    token: &Decomposed<'_>,
    validator: &ClaimsValidator,
    clock: &C,
) -> Result<Claims, KeyRejectionError> {
    if !key.is_signing_key() {
        return Err(error::jwk_usage_mismatch().into());
    }

    let alg = jwa::resolve(key)?;
    token.verify(key, alg, validator, clock)
}

#[derive(Debug)]
struct Inner<S, C> {
    cache: KeySetCache<S, C>,
    validator: ClaimsValidator,
}

/// An authority backed by a remotely published key set
///
/// Cloning is cheap; clones share the same key set cache.
#[derive(Debug)]
#[must_use]
pub struct RemoteAuthority<S, C = System> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for RemoteAuthority<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeySetSource> RemoteAuthority<S> {
    /// Constructs an authority that fetches keys from `source` on first use
    pub fn new(source: S, validator: ClaimsValidator) -> Self {
        Self::with_clock(source, System, validator)
    }
}

#[cfg(feature = "reqwest")]
impl RemoteAuthority<crate::cache::RemoteKeySource> {
    /// Constructs an authority that fetches keys from `jwks_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn from_url(
        jwks_url: impl Into<String>,
        validator: ClaimsValidator,
    ) -> Result<Self, ConfigError> {
        let source = crate::cache::RemoteKeySource::new(jwks_url)?;
        Ok(Self::new(source, validator))
    }
}

impl<S, C> RemoteAuthority<S, C>
where
    S: KeySetSource,
    C: Clock,
{
    /// Constructs an authority that measures key set expiry against `clock`
    pub fn with_clock(source: S, clock: C, validator: ClaimsValidator) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: KeySetCache::with_clock(source, clock),
                validator,
            }),
        }
    }

    /// The key set cache
    pub fn cache(&self) -> &KeySetCache<S, C> {
        &self.inner.cache
    }

    /// The claims validator applied after a signature checks out
    pub fn validator(&self) -> &ClaimsValidator {
        &self.inner.validator
    }

    /// Fetches the key set regardless of whether it has expired
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails. The previous keys stay in use.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        self.inner.cache.get_keys(true).await
    }
}

impl<S, C> RemoteAuthority<S, C>
where
    S: KeySetSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Spawns a task that keeps the key set fresh
    ///
    /// The keys are loaded immediately, then refreshed each time the set
    /// expires. After a failed refresh, the task waits 30 seconds before
    /// trying again. Abort the returned handle to stop refreshing.
    pub fn spawn_refresh(&self) -> JoinHandle<()> {
        let this = self.clone();

        tokio::spawn(async move {
            let mut force_refresh = false;
            loop {
                let delay = match this.inner.cache.get_keys(force_refresh).await {
                    Ok(keys) => {
                        let now = this.inner.cache.clock().now();
                        Duration::from(keys.next_update().saturating_duration_since(now))
                            .max(MIN_REFRESH_DELAY)
                    }
                    Err(_) => REFRESH_RETRY_DELAY,
                };

                tracing::trace!(delay.secs = delay.as_secs(), "next key set refresh scheduled");
                tokio::time::sleep(delay).await;
                force_refresh = true;
            }
        })
    }
}

#[async_trait]
impl<S, C> Authority for RemoteAuthority<S, C>
where
    S: KeySetSource + fmt::Debug,
    C: Clock + fmt::Debug + Send + Sync,
{
    async fn try_verify(&self, token: &JwtRef) -> Result<Claims, TokenVerificationFailure> {
        let decomposed = token.decompose()?;
        let keys = self.inner.cache.get_keys(false).await?;
        verify_with_key_set(
            &keys,
            &decomposed,
            &self.inner.validator,
            self.inner.cache.clock(),
        )
    }
}

/// An authority that never checks signatures
///
/// When configured with claims, every token is answered with those claims.
/// Otherwise, the token's own payload is decoded and returned unverified.
/// Only malformed tokens are rejected.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct FixedClaimsAuthority {
    claims: Claims,
}

impl FixedClaimsAuthority {
    /// Answers every token with `claims`
    ///
    /// Empty claims behave like [`FixedClaimsAuthority::passthrough`].
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    /// Answers every token with its own unverified payload
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// The configured claims
    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

#[async_trait]
impl Authority for FixedClaimsAuthority {
    async fn try_verify(&self, token: &JwtRef) -> Result<Claims, TokenVerificationFailure> {
        if !self.claims.is_empty() {
            return Ok(self.claims.clone());
        }

        Ok(token.untrusted_claims()?)
    }
}

/// Selects and configures an [`Authority`]
///
/// ```
/// use stoke::authority::AuthorityConfig;
///
/// let config: AuthorityConfig = serde_json::from_str(r#"{
///     "kind": "fixed",
///     "claims": { "role": "eng" }
/// }"#).unwrap();
///
/// let authority = config.build().unwrap();
/// # let _ = authority;
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorityConfig {
    /// Verify tokens against a remotely published key set
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    Remote(RemoteConfig),

    /// Skip verification and answer with fixed claims
    Fixed {
        /// The claims to answer with, or empty to decode each token's payload
        #[serde(default)]
        claims: Claims,
    },
}

impl AuthorityConfig {
    /// Builds the configured authority
    ///
    /// Remote authorities start empty and fetch their keys on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed from the
    /// configured options.
    pub fn build(&self) -> Result<Arc<dyn Authority>, ConfigError> {
        match self {
            #[cfg(feature = "reqwest")]
            Self::Remote(config) => Ok(Arc::new(config.build()?)),
            Self::Fixed { claims } => Ok(Arc::new(FixedClaimsAuthority::new(claims.clone()))),
        }
    }
}

/// Options for a [`RemoteAuthority`] fetching keys over HTTP
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// The URL of the key set document
    pub jwks_url: String,

    /// Time allowed for each key set fetch
    #[serde(default = "default_timeout")]
    pub timeout: DurationSecs,

    /// Extra headers sent with each fetch
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,

    /// Grace period applied to the `exp` and `nbf` claims
    #[serde(default)]
    pub leeway: DurationSecs,

    /// Audiences to accept; any audience is accepted when empty
    #[serde(default)]
    pub audiences: Vec<crate::jwt::Audience>,

    /// The issuer tokens must name
    #[serde(default)]
    pub issuer: Option<crate::jwt::Issuer>,

    /// Whether tokens must carry an `exp` claim
    #[serde(default)]
    pub require_expiration: bool,

    /// An additional PEM-encoded root certificate to trust
    #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
    #[serde(default)]
    pub ca_file: Option<std::path::PathBuf>,
}

#[cfg(feature = "reqwest")]
fn default_timeout() -> DurationSecs {
    DurationSecs(30)
}

#[cfg(feature = "reqwest")]
impl RemoteConfig {
    /// Builds the claims validator described by these options
    pub fn validator(&self) -> ClaimsValidator {
        let mut validator = ClaimsValidator::default()
            .with_leeway(self.leeway.into())
            .extend_allowed_audiences(self.audiences.iter().cloned());

        if let Some(issuer) = &self.issuer {
            validator = validator.require_issuer(issuer.clone());
        }

        if self.require_expiration {
            validator = validator.require_expiration();
        }

        validator
    }

    /// Builds the authority described by these options
    ///
    /// # Errors
    ///
    /// Returns an error if a header is invalid, the certificate file cannot
    /// be read, or the HTTP client cannot be constructed.
    pub fn build(&self) -> Result<RemoteAuthority<crate::cache::RemoteKeySource>, ConfigError> {
        let builder = crate::cache::RemoteKeySource::builder(&self.jwks_url)
            .with_timeout(self.timeout.into());

        let builder = self
            .headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.with_header(name, value));

        #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
        let builder = match &self.ca_file {
            Some(path) => builder.add_root_certificate_file(path),
            None => builder,
        };

        Ok(RemoteAuthority::new(builder.build()?, self.validator()))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use stoke_clock::{TestClock, UnixTime};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        jwk::{KeyMaterial, Usage},
        test::{self, CountingSource, TestSigner},
    };

    type TestAuthority = RemoteAuthority<Arc<CountingSource>, Arc<TestClock>>;

    fn authority_with(
        keys: Vec<VerificationKey>,
        validator: ClaimsValidator,
    ) -> (Arc<TestClock>, Arc<CountingSource>, TestAuthority) {
        let clock = Arc::new(TestClock::new(UnixTime(1_000)));
        let source = Arc::new(CountingSource::new(
            keys,
            DurationSecs(300),
            Arc::clone(&clock),
        ));
        let authority =
            RemoteAuthority::with_clock(Arc::clone(&source), Arc::clone(&clock), validator);
        (clock, source, authority)
    }

    fn rsa_2048() -> VerificationKey {
        let mut modulus = vec![0xc5; 256];
        modulus[0] = 0xb1;
        VerificationKey::new(KeyMaterial::Rsa {
            modulus,
            exponent: vec![1, 0, 1],
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn first_accepting_key_wins() -> Result<()> {
        let other = TestSigner::ed25519();
        let signer = TestSigner::p256();
        let (_, _, authority) = authority_with(
            vec![other.key(), rsa_2048(), signer.key()],
            ClaimsValidator::default(),
        );

        let token = signer.sign(&json!({ "role": "eng", "exp": 2_000 }));
        let claims = authority.verify(&token).await.expect("token accepted");
        dbg!(&claims);

        assert_eq!(claims.get_str("role"), Some("eng"));
        Ok(())
    }

    #[tokio::test]
    async fn every_rejection_is_recorded() -> Result<()> {
        let signer = TestSigner::p256();
        let stranger = TestSigner::p256();
        let (_, _, authority) = authority_with(
            vec![
                rsa_2048(),
                stranger.key(),
                signer.key().with_usage(Usage::Encryption),
            ],
            ClaimsValidator::default(),
        );

        let token = signer.sign(&json!({ "role": "eng" }));
        let failure = authority.try_verify(&token).await.unwrap_err();
        let rejections = failure.rejections();
        dbg!(rejections);

        assert_eq!(rejections.len(), 3);
        assert!(matches!(
            rejections[0].error(),
            KeyRejectionError::UnresolvedAlgorithm(_)
        ));
        assert!(matches!(
            rejections[1].error(),
            KeyRejectionError::Signature(e) if e.is_signature_mismatch()
        ));
        assert!(matches!(
            rejections[2].error(),
            KeyRejectionError::JwkUsageMismatch(_)
        ));
        assert_eq!(rejections[2].index(), 2);
        assert!(rejections[2].key_id().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_tokens_do_not_fetch_keys() {
        let (_, source, authority) =
            authority_with(vec![TestSigner::p256().key()], ClaimsValidator::default());

        let failure = authority
            .try_verify(JwtRef::from_str("definitely.not"))
            .await
            .unwrap_err();

        assert!(matches!(failure, TokenVerificationFailure::Malformed(_)));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn unavailable_keys_reject_the_token() {
        let signer = TestSigner::p256();
        let (_, source, authority) = authority_with(vec![signer.key()], ClaimsValidator::default());
        source.set_failing(true);

        let token = signer.sign(&json!({}));
        let failure = authority.try_verify(&token).await.unwrap_err();
        assert!(matches!(failure, TokenVerificationFailure::KeysUnavailable(_)));
        assert!(authority.verify(&token).await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_rejected_despite_valid_signature() {
        let signer = TestSigner::ed25519();
        let (_, _, authority) = authority_with(vec![signer.key()], ClaimsValidator::default());

        let token = signer.sign(&json!({ "exp": 999 }));
        let failure = authority.try_verify(&token).await.unwrap_err();
        assert!(matches!(
            failure.rejections()[0].error(),
            KeyRejectionError::ClaimsRejected(error::ClaimsRejected::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn header_algorithm_must_match_key() {
        let signer = TestSigner::p384();
        let (_, _, authority) = authority_with(vec![signer.key()], ClaimsValidator::default());

        let token = signer.sign_with_header(&json!({ "alg": "ES256" }), &json!({}));
        let failure = authority.try_verify(&token).await.unwrap_err();
        assert!(matches!(
            failure.rejections()[0].error(),
            KeyRejectionError::AlgorithmMismatch(_)
        ));
    }

    #[tokio::test]
    async fn stale_keys_are_refetched_before_verifying() -> Result<()> {
        let signer = TestSigner::p256();
        let (clock, source, authority) =
            authority_with(vec![signer.key()], ClaimsValidator::default());
        let token = signer.sign(&json!({}));

        let first = authority.try_verify(&token).await?;
        let second = authority.try_verify(&token).await?;
        assert_eq!(first, second);
        assert_eq!(source.fetches(), 1);

        clock.inc(300);
        let refetched = authority.try_verify(&token).await?;
        assert_eq!(refetched, first);
        assert_eq!(source.fetches(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_task_loads_keys() -> Result<()> {
        let (_, source, authority) =
            authority_with(vec![TestSigner::p256().key()], ClaimsValidator::default());

        let handle = authority.spawn_refresh();
        tokio::time::timeout(Duration::from_secs(5), async {
            while authority.cache().cached().is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        handle.abort();

        assert_eq!(source.fetches(), 1);
        assert_eq!(authority.cache().cached().map(|keys| keys.len()), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn fixed_claims_answer_every_token() -> Result<()> {
        let authority = FixedClaimsAuthority::new(Claims::new().with("role", "admin"));

        let claims = authority
            .try_verify(JwtRef::from_str("not even a token"))
            .await?;
        assert_eq!(claims.get_str("role"), Some("admin"));
        Ok(())
    }

    #[tokio::test]
    async fn passthrough_decodes_unverified_payload() -> Result<()> {
        let authority = FixedClaimsAuthority::passthrough();
        let token = test::unsigned_token(&json!({ "alg": "none" }), &json!({ "n": "alice" }));

        let claims = authority.try_verify(&token).await?;
        assert_eq!(claims.get_str("n"), Some("alice"));

        assert!(authority.verify(JwtRef::from_str("garbage")).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn config_selects_fixed_authority() -> Result<()> {
        let config: AuthorityConfig =
            serde_json::from_value(json!({ "kind": "fixed", "claims": { "role": "eng" } }))?;
        let authority = config.build()?;

        let claims = authority.verify(JwtRef::from_str("a.b.c")).await;
        assert_eq!(
            claims.as_ref().and_then(|c| c.get_str("role")),
            Some("eng")
        );
        Ok(())
    }

    #[test]
    #[cfg(feature = "reqwest")]
    fn remote_config_defaults() -> Result<()> {
        let config: AuthorityConfig = serde_json::from_value(json!({
            "kind": "remote",
            "jwks_url": "https://auth.example/jwks",
            "leeway": 5,
            "audiences": ["api"],
        }))?;

        let AuthorityConfig::Remote(remote) = &config else {
            panic!("expected remote config, got {config:?}");
        };
        assert_eq!(remote.timeout, DurationSecs(30));
        assert_eq!(remote.leeway, DurationSecs(5));
        assert!(remote.headers.is_empty());

        config.build()?;
        Ok(())
    }
}
