//! Common errors

#![allow(missing_copy_implementations)]

use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::{jwa, jwk};

/// The JWK is missing a field required by its key type, or a field could
/// not be decoded
#[derive(Debug, Error)]
#[error("malformed JWK: {reason}")]
pub struct MalformedJwk {
    reason: &'static str,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

pub(crate) fn malformed_jwk(reason: &'static str) -> MalformedJwk {
    MalformedJwk {
        reason,
        source: None,
    }
}

pub(crate) fn malformed_jwk_field(
    reason: &'static str,
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwk {
    MalformedJwk {
        reason,
        source: Some(source.into()),
    }
}

/// The key metadata does not map to any algorithm this crate knows how to
/// verify with
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no algorithm resolves for {key_type} key ({detail})")]
pub struct UnresolvedAlgorithm {
    key_type: jwk::KeyType,
    detail: String,
}

impl UnresolvedAlgorithm {
    /// The type of the key that failed to resolve
    pub fn key_type(&self) -> jwk::KeyType {
        self.key_type
    }
}

pub(crate) fn unresolved_algorithm(
    key_type: jwk::KeyType,
    detail: impl Into<String>,
) -> UnresolvedAlgorithm {
    UnresolvedAlgorithm {
        key_type,
        detail: detail.into(),
    }
}

/// The JWK has a specific usage that disallows this use
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("JWK cannot be used in this way")]
pub struct JwkUsageMismatch {
    _p: (),
}

pub(crate) const fn jwk_usage_mismatch() -> JwkUsageMismatch {
    JwkUsageMismatch { _p: () }
}

/// The token header names a different algorithm than the one resolved
/// for the key
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("token declares algorithm '{declared}' but key resolves to '{resolved}'")]
pub struct AlgorithmMismatch {
    declared: String,
    resolved: jwa::Algorithm,
}

pub(crate) fn algorithm_mismatch(declared: &str, resolved: jwa::Algorithm) -> AlgorithmMismatch {
    AlgorithmMismatch {
        declared: declared.to_owned(),
        resolved,
    }
}

/// The JWK cannot be used with the requested algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key incompatible with algorithm '{alg}'")]
pub struct IncompatibleAlgorithm {
    alg: jwa::Algorithm,
}

pub(crate) const fn incompatible_algorithm(alg: jwa::Algorithm) -> IncompatibleAlgorithm {
    IncompatibleAlgorithm { alg }
}

/// The algorithm resolves, but no verifier is available for it
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("algorithm '{alg}' is not supported for verification")]
pub struct UnsupportedAlgorithm {
    alg: jwa::Algorithm,
}

pub(crate) const fn unsupported_algorithm(alg: jwa::Algorithm) -> UnsupportedAlgorithm {
    UnsupportedAlgorithm { alg }
}

/// The signature did not match
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch {
    _p: (),
}

pub(crate) const fn signature_mismatch() -> SignatureMismatch {
    SignatureMismatch { _p: () }
}

/// The JWT is malformed and cannot be parsed out into header, payload, and signature sections
#[derive(Clone, Copy, Debug, Error)]
#[error("malformed JWT")]
pub struct MalformedJwt {
    _p: (),
}

pub(crate) const fn malformed_jwt() -> MalformedJwt {
    MalformedJwt { _p: () }
}

/// The JWT header section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT header")]
pub struct MalformedJwtHeader {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_header(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtHeader {
    MalformedJwtHeader {
        source: source.into(),
    }
}

/// The JWT payload section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT payload")]
pub struct MalformedJwtPayload {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtPayload {
    MalformedJwtPayload {
        source: source.into(),
    }
}

/// The JWT signature section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT signature")]
pub struct MalformedJwtSignature {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_signature(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtSignature {
    MalformedJwtSignature {
        source: source.into(),
    }
}

/// A token that cannot be taken apart into its sections
#[derive(Debug, Error)]
pub enum MalformedToken {
    /// The JWT does not have exactly three sections
    #[error(transparent)]
    Structure(#[from] MalformedJwt),

    /// The JWT header is malformed
    #[error(transparent)]
    Header(#[from] MalformedJwtHeader),

    /// The JWT payload is malformed
    #[error(transparent)]
    Payload(#[from] MalformedJwtPayload),

    /// The JWT signature is malformed
    #[error(transparent)]
    Signature(#[from] MalformedJwtSignature),
}

/// An error occurring while checking a signature against a single key
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The key cannot be used with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// The algorithm has no available verifier
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] UnsupportedAlgorithm),

    /// The signature is invalid
    #[error(transparent)]
    SignatureMismatch(#[from] SignatureMismatch),
}

impl SignatureError {
    /// Whether the error is due to a signature mismatch
    #[must_use]
    pub fn is_signature_mismatch(&self) -> bool {
        matches!(self, Self::SignatureMismatch(_))
    }
}

/// An error occurring when validating the claims of a JWT
#[derive(Debug, Error)]
pub enum ClaimsRejected {
    /// The token audience is not acceptable
    #[error("invalid audience")]
    InvalidAudience,

    /// The token issuer is not acceptable
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The token is expired according to the `exp` claim
    #[error("token expired")]
    TokenExpired,

    /// The token is not yet valid according to the `nbf` claim
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// A required claim is missing
    #[error("required {_0} claim missing")]
    MissingRequiredClaim(&'static str),

    /// A registered claim has the wrong shape, such as a non-numeric `exp`
    #[error("{_0} claim is malformed")]
    MalformedClaim(&'static str),
}

/// The reason a single key did not accept a token
#[derive(Debug, Error)]
pub enum KeyRejectionError {
    /// No algorithm could be resolved for the key
    #[error(transparent)]
    UnresolvedAlgorithm(#[from] UnresolvedAlgorithm),

    /// The key is not intended for signature verification
    #[error(transparent)]
    JwkUsageMismatch(#[from] JwkUsageMismatch),

    /// The token header names a different algorithm
    #[error(transparent)]
    AlgorithmMismatch(#[from] AlgorithmMismatch),

    /// The signature check failed
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The signature was valid, but the payload was not a JSON object
    #[error(transparent)]
    MalformedPayload(#[from] MalformedJwtPayload),

    /// The signature was valid, but the claims were not acceptable
    #[error("token rejected by claims validator")]
    ClaimsRejected(#[from] ClaimsRejected),
}

/// A rejection of a token by one key of a key set
#[derive(Debug)]
pub struct KeyRejection {
    pub(crate) index: usize,
    pub(crate) key_id: Option<jwk::KeyId>,
    pub(crate) error: KeyRejectionError,
}

impl KeyRejection {
    /// The position of the key within the key set
    pub fn index(&self) -> usize {
        self.index
    }

    /// The ID of the key, if it had one
    pub fn key_id(&self) -> Option<&jwk::KeyIdRef> {
        self.key_id.as_deref()
    }

    /// Why the key rejected the token
    pub fn error(&self) -> &KeyRejectionError {
        &self.error
    }
}

impl fmt::Display for KeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.key_id {
            Some(kid) => write!(f, "key {} ({}): {}", self.index, kid, self.error),
            None => write!(f, "key {}: {}", self.index, self.error),
        }
    }
}

/// A failure to fetch or parse the remote key set
#[derive(Debug, Error)]
pub enum KeyFetchError {
    /// The request could not be sent, timed out, or returned a non-success status
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("error requesting key set")]
    Request(#[from] reqwest::Error),

    /// The key set document could not be parsed
    #[error("malformed key set document")]
    MalformedDocument(#[from] serde_json::Error),

    /// A custom key source failed
    #[error("key source unavailable")]
    Source(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl KeyFetchError {
    /// Wraps an error raised by a custom [`KeySetSource`][crate::cache::KeySetSource]
    pub fn source_error(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Source(source.into())
    }
}

/// The token could not be verified by any available key
#[derive(Debug, Error)]
pub enum TokenVerificationFailure {
    /// No keys were available to verify against
    #[error("no keys available to verify token")]
    KeysUnavailable(#[from] KeyFetchError),

    /// The token is not a well-formed JWT
    #[error("invalid JWT")]
    Malformed(#[from] MalformedToken),

    /// Every key in the set rejected the token
    #[error("token rejected by all {} keys", .0.len())]
    NoKeyAccepted(Vec<KeyRejection>),
}

impl TokenVerificationFailure {
    /// The per-key rejections, when keys were tried
    pub fn rejections(&self) -> &[KeyRejection] {
        match self {
            Self::NoKeyAccepted(rejections) => rejections,
            _ => &[],
        }
    }
}

/// A configuration value could not be turned into a working component
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The HTTP client could not be constructed
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("unable to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// A configured header name or value is not valid in HTTP
    #[error("invalid header '{name}'")]
    InvalidHeader {
        /// The configured header name
        name: String,
    },

    /// A configured root certificate could not be read
    #[error("unable to read certificate file")]
    CertificateFile(#[from] std::io::Error),
}
