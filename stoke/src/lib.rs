//! Client-side verification of JSON Web Tokens (JWTs) issued by a known
//! authority
//!
//! The authority publishes its public keys as a JSON Web Key Set that
//! carries its own expiry. This crate fetches and caches that set, picks a
//! verification algorithm for each key from the key's own metadata, and
//! verifies bearer tokens against the keys in turn.
//!
//! * [`cache`] holds the key set and refreshes it when it expires.
//! * [`jwa`] maps key metadata to a signature algorithm.
//! * [`authority`] verifies tokens and produces their [`Claims`][jwt::Claims].
//! * [`gate`] turns an `Authorization` header into claims that satisfy a
//!   [`RequiredClaims`][policy::RequiredClaims] or
//!   [`ClaimRequirements`][policy::ClaimRequirements] policy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stoke::{authority::RemoteAuthority, gate::ClaimGate, jwt::ClaimsValidator, required_claims};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let authority = RemoteAuthority::from_url(
//!     "https://auth.example/api/jwks",
//!     ClaimsValidator::default().with_leeway_secs(5),
//! )?;
//! let _refresh = authority.spawn_refresh();
//!
//! let gate = ClaimGate::new(Arc::new(authority))
//!     .with_required_claims(required_claims! { "role" => "eng" });
//!
//! match gate.admit(Some("Bearer eyJhbGciOiJFUzI1NiJ9.e30.c2ln")).await {
//!     Ok(claims) => println!("admitted with {} claims", claims.len()),
//!     Err(rejection) => println!("rejected: {}", rejection.reason()),
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
mod b64;
pub mod cache;
pub mod error;
pub mod gate;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jws;
pub mod jwt;
pub mod policy;

#[cfg(test)]
pub(crate) mod test;

pub use authority::{Authority, AuthorityConfig};
pub use gate::{ClaimGate, GateRejection};
pub use jwk::VerificationKey;
pub use jwks::KeySet;
pub use jwt::{Claims, Jwt, JwtRef};
pub use policy::{ClaimRequirements, RequiredClaims};
