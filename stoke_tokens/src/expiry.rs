//! Reading the expiry of an access token without verifying it

use stoke::{error::MalformedToken, JwtRef};
use stoke_clock::{Clock, DurationSecs, UnixTime};

/// The assumed lifetime of a token that does not declare its expiry
pub const DEFAULT_TOKEN_LIFETIME: DurationSecs = DurationSecs(5 * 60);

/// Reads the `exp` claim of a token without verifying its signature
///
/// The payload may be encoded with or without base64 padding. Returns
/// `Ok(None)` if the payload is readable but has no numeric `exp`.
///
/// # Errors
///
/// Returns an error if the token has no readable JSON payload.
pub fn try_expires_from_token(token: &str) -> Result<Option<UnixTime>, MalformedToken> {
    let claims = JwtRef::from_str(token).untrusted_claims()?;
    Ok(claims.exp())
}

/// Determines when a token expires
///
/// Tokens that cannot be read, or that do not declare a numeric `exp`, are
/// assumed to expire five minutes from now.
///
/// ```
/// use stoke_clock::{TestClock, UnixTime};
/// use stoke_tokens::expires_from_token;
///
/// let clock = TestClock::new(UnixTime(1_000));
///
/// // {"exp":1700000000}
/// let token = "e30.eyJleHAiOjE3MDAwMDAwMDB9.c2ln";
/// assert_eq!(expires_from_token(token, &clock), UnixTime(1_700_000_000));
/// assert_eq!(expires_from_token("", &clock), UnixTime(1_300));
/// ```
pub fn expires_from_token<C: Clock>(token: &str, clock: &C) -> UnixTime {
    match try_expires_from_token(token) {
        Ok(Some(exp)) => exp,
        Ok(None) => clock.now() + DEFAULT_TOKEN_LIFETIME,
        Err(err) => {
            if !token.is_empty() {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(error, "unable to read token expiry; assuming default lifetime");
            }
            clock.now() + DEFAULT_TOKEN_LIFETIME
        }
    }
}
