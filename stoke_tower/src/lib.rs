//! Authorizers for working with `tower_http` and other constructs in the
//! ecosystem, including `axum` and gRPC servers built on `tower`.
//!
//! [`VerifyClaims`] runs each request through a [`ClaimGate`][stoke::ClaimGate]
//! and either forwards it with the verified [`Claims`][stoke::Claims] in its
//! extensions, or answers it with a response from an [`OnClaimGateError`]
//! handler.
//!
//! See the `examples` folder in this crate for a working `axum` server.
//!
//! ```
//! use std::sync::Arc;
//!
//! use axum::{routing::get, Extension, Router};
//! use stoke::{authority::FixedClaimsAuthority, required_claims, ClaimGate, Claims};
//! use stoke_tower::{VerboseErrorHandler, VerifyClaims};
//!
//! let gate = ClaimGate::new(Arc::new(FixedClaimsAuthority::passthrough()))
//!     .with_required_claims(required_claims! { "role" => "eng" });
//!
//! let app: Router = Router::new()
//!     .route("/widgets", get(list_widgets))
//!     .layer(VerifyClaims::<VerboseErrorHandler<axum::body::Body>>::verbose(gate).layer());
//!
//! async fn list_widgets(Extension(claims): Extension<Claims>) -> String {
//!     format!("widgets for {}", claims.get_str("sub").unwrap_or("nobody"))
//! }
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

use std::{fmt, marker::PhantomData};

pub mod util;
mod verify;

pub use crate::verify::*;

macro_rules! error_handler {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<ResBody> {
            _ty: PhantomData<fn() -> ResBody>,
        }

        impl<ResBody> $name<ResBody> {
            /// Instantiates a new instance over a given body type
            #[inline]
            pub fn new() -> Self {
                Self { _ty: PhantomData }
            }
        }

        impl<ResBody> fmt::Debug for $name<ResBody> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }

        impl<ResBody> Default for $name<ResBody> {
            #[inline]
            fn default() -> Self {
                Self { _ty: PhantomData }
            }
        }

        impl<ResBody> Clone for $name<ResBody> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<ResBody> Copy for $name<ResBody> {}
    };
}

error_handler! {
    /// Responds to every rejection with `401 Unauthorized` and no description
    TerseErrorHandler
}

error_handler! {
    /// Responds with `401 Unauthorized` and a description of the failure, or
    /// `403 Forbidden` when the token lacked a required claim
    VerboseErrorHandler
}

error_handler! {
    /// Responds with the gRPC `UNAUTHENTICATED` status, for servers speaking
    /// gRPC over HTTP/2
    GrpcErrorHandler
}
