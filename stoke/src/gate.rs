//! A framework-agnostic gate admitting requests that carry acceptable claims
//!
//! The gate reads the value of an `Authorization` header, verifies the
//! bearer token with an [`Authority`], and then checks the resulting claims
//! against a set of [`ClaimRequirements`]. Framework adapters only need to
//! supply the header and turn a [`GateRejection`] into a response.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    authority::Authority,
    jwt::{Claims, JwtRef},
    policy::{ClaimRequirements, MissingRequiredClaims, Policy},
};

/// The reason a request was turned away
#[derive(Debug, Error)]
pub enum GateRejection {
    /// No bearer token was presented
    #[error("Missing Authorization Token")]
    MissingToken,

    /// The bearer token was not accepted by the authority
    #[error("Invalid Token")]
    InvalidToken,

    /// The token was valid, but lacked a required claim
    #[error("Missing required claims")]
    InsufficientClaims(#[from] MissingRequiredClaims),
}

impl GateRejection {
    /// A generic description safe to return to the caller
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "Missing Authorization Token",
            Self::InvalidToken => "Invalid Token",
            Self::InsufficientClaims(_) => "Missing required claims",
        }
    }

    /// Whether the caller was identified but is not permitted
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::InsufficientClaims(_))
    }
}

/// Extracts the token from a bearer `Authorization` header value
///
/// The `Bearer` scheme is matched without regard to case.
///
/// ```
/// use stoke::gate::extract_bearer;
///
/// assert_eq!(extract_bearer("bearer abc.def.ghi").map(|t| t.as_str()), Some("abc.def.ghi"));
/// assert!(extract_bearer("Basic dXNlcjpwYXNz").is_none());
/// assert!(extract_bearer("Bearer ").is_none());
/// ```
pub fn extract_bearer(authorization: &str) -> Option<&JwtRef> {
    let scheme = authorization.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = authorization[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(JwtRef::from_str(token))
    }
}

/// Admits requests whose bearer token carries the required claims
#[derive(Debug, Clone)]
#[must_use]
pub struct ClaimGate {
    authority: Arc<dyn Authority>,
    required: ClaimRequirements,
}

impl ClaimGate {
    /// Constructs a gate that requires only a valid token
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self {
            authority,
            required: ClaimRequirements::new(),
        }
    }

    /// Sets the claims that must be present
    ///
    /// Accepts either exact [`RequiredClaims`][crate::policy::RequiredClaims]
    /// or [`ClaimRequirements`] built from claim tests.
    pub fn with_required_claims(self, required: impl Into<ClaimRequirements>) -> Self {
        Self {
            required: required.into(),
            ..self
        }
    }

    /// The authority used to verify tokens
    pub fn authority(&self) -> &Arc<dyn Authority> {
        &self.authority
    }

    /// The claims that must be present
    pub fn required_claims(&self) -> &ClaimRequirements {
        &self.required
    }

    /// Evaluates the value of an `Authorization` header
    ///
    /// When no bearer token is present, the authority is never consulted.
    ///
    /// # Errors
    ///
    /// Returns the reason the request should be turned away.
    pub async fn admit(&self, authorization: Option<&str>) -> Result<Claims, GateRejection> {
        let token = authorization
            .and_then(extract_bearer)
            .ok_or(GateRejection::MissingToken)?;

        self.admit_token(token).await
    }

    /// Evaluates an already extracted token
    ///
    /// # Errors
    ///
    /// Returns the reason the request should be turned away.
    pub async fn admit_token(&self, token: &JwtRef) -> Result<Claims, GateRejection> {
        let claims = self
            .authority
            .verify(token)
            .await
            .ok_or(GateRejection::InvalidToken)?;

        if let Err(denial) = self.required.evaluate(&claims) {
            tracing::debug!(missing = ?denial.missing(), "token lacks required claims");
            return Err(denial.into());
        }

        Ok(claims)
    }
}
