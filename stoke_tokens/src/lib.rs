//! Login, token refresh, and bearer credentials for clients of a stoke
//! authority
//!
//! A client logs in once with a username and password and receives an
//! access token and a refresh token. From then on a
//! [`CredentialRefresher`] hands out [`CallCredentials`] for each outbound
//! call, exchanging the refresh token for a new pair shortly before the
//! access token expires. The expiry is read from the token's own `exp`
//! claim without verifying it.
//!
//! If an exchange fails, the refresher holds empty tokens and stops trying
//! to refresh until the next successful login.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stoke_tokens::{AccessToken, Password, RefresherConfig, Username};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let refresher = Arc::new(RefresherConfig::default().build(AccessToken::from_static(""))?);
//! refresher
//!     .login(
//!         "https://auth.example",
//!         &Username::from_static("alice"),
//!         &Password::from_static("hunter2"),
//!     )
//!     .await?;
//! let _refresh = refresher.spawn_refresh();
//!
//! let client = reqwest::Client::new();
//! let creds = refresher.call_credentials().await;
//! let resp = creds
//!     .authorize(client.get("https://api.example/widgets"))
//!     .send()
//!     .await?;
//! # drop(resp);
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

mod braids;
pub mod credentials;
pub mod endpoint;
pub mod expiry;

pub use braids::*;
pub use credentials::{CallCredentials, CredentialRefresher, CredentialState, RefresherConfig};
#[cfg(feature = "reqwest")]
pub use endpoint::HttpTokenEndpoint;
pub use endpoint::{TokenEndpoint, TokenPair, TokenRequestError};
pub use expiry::{expires_from_token, try_expires_from_token};
