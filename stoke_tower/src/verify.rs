use std::{fmt, future::Future, pin::Pin, sync::Arc};

use http::{header, Request, Response};
use stoke::{gate::ClaimGate, policy::MissingRequiredClaims, GateRejection};
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};

use crate::{
    util::{forbidden, grpc_unauthenticated, unauthorized},
    GrpcErrorHandler, TerseErrorHandler, VerboseErrorHandler,
};

/// Authorizes requests through a [`ClaimGate`]
///
/// On success, the verified [`Claims`][stoke::Claims] are inserted into the
/// request extensions for downstream handlers.
pub struct VerifyClaims<OnError> {
    gate: Arc<ClaimGate>,
    on_error: OnError,
}

impl<OnError> Clone for VerifyClaims<OnError>
where
    OnError: Clone,
{
    #[inline]
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for VerifyClaims<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VerifyClaims")
            .field("gate", &self.gate)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl<OnError> VerifyClaims<OnError> {
    /// Authorizes through `gate`, responding to rejections with `on_error`
    #[inline]
    pub fn new(gate: ClaimGate, on_error: OnError) -> Self {
        Self {
            gate: Arc::new(gate),
            on_error,
        }
    }

    /// The gate requests must pass
    pub fn gate(&self) -> &ClaimGate {
        &self.gate
    }

    /// Wraps this authorizer in a layer
    pub fn layer(self) -> AsyncRequireAuthorizationLayer<Self> {
        AsyncRequireAuthorizationLayer::new(self)
    }
}

impl<ResBody> VerifyClaims<TerseErrorHandler<ResBody>> {
    /// Responds to every rejection with an empty `401 Unauthorized`
    #[inline]
    pub fn terse(gate: ClaimGate) -> Self {
        Self::new(gate, TerseErrorHandler::new())
    }
}

impl<ResBody> VerifyClaims<VerboseErrorHandler<ResBody>> {
    /// Describes each rejection, using `403 Forbidden` for missing claims
    #[inline]
    pub fn verbose(gate: ClaimGate) -> Self {
        Self::new(gate, VerboseErrorHandler::new())
    }
}

impl<ResBody> VerifyClaims<GrpcErrorHandler<ResBody>> {
    /// Rejects calls with the gRPC `UNAUTHENTICATED` status
    #[inline]
    pub fn grpc(gate: ClaimGate) -> Self {
        Self::new(gate, GrpcErrorHandler::new())
    }
}

impl<OnError, ReqBody> AsyncAuthorizeRequest<ReqBody> for VerifyClaims<OnError>
where
    OnError: OnClaimGateError + Clone + Send + 'static,
    OnError::Body: Send + 'static,
    ReqBody: Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = OnError::Body;
    type Future = Pin<
        Box<dyn Future<Output = Result<Request<ReqBody>, Response<OnError::Body>>> + Send>,
    >;

    fn authorize(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let gate = Arc::clone(&self.gate);
        let on_error = self.on_error.clone();

        Box::pin(async move {
            let admitted = {
                let authorization = request
                    .headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok());
                gate.admit(authorization).await
            };

            match admitted {
                Ok(claims) => {
                    tracing::trace!("request admitted");
                    request.extensions_mut().insert(claims);
                    Ok(request)
                }
                Err(rejection) => {
                    tracing::debug!(reason = rejection.reason(), "request rejected");
                    Err(on_error.on_rejection(&rejection))
                }
            }
        })
    }
}

/// Handler for responding to requests turned away by a [`ClaimGate`]
pub trait OnClaimGateError {
    /// The body type returned on an error
    type Body;

    /// Response when no bearer token was presented
    fn on_missing_token(&self) -> Response<Self::Body>;

    /// Response when the authority did not accept the token
    fn on_invalid_token(&self) -> Response<Self::Body>;

    /// Response when the token lacked a required claim
    fn on_insufficient_claims(&self, denial: &MissingRequiredClaims) -> Response<Self::Body>;

    /// Dispatches a rejection to the matching response
    fn on_rejection(&self, rejection: &GateRejection) -> Response<Self::Body> {
        match rejection {
            GateRejection::MissingToken => self.on_missing_token(),
            GateRejection::InvalidToken => self.on_invalid_token(),
            GateRejection::InsufficientClaims(denial) => self.on_insufficient_claims(denial),
        }
    }
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T> OnClaimGateError for $ty
            where
                T: OnClaimGateError,
            {
                type Body = T::Body;

                fn on_missing_token(&self) -> Response<Self::Body> {
                    T::on_missing_token(self)
                }

                fn on_invalid_token(&self) -> Response<Self::Body> {
                    T::on_invalid_token(self)
                }

                fn on_insufficient_claims(&self, denial: &MissingRequiredClaims) -> Response<Self::Body> {
                    T::on_insufficient_claims(self, denial)
                }
            }
        )*
    }
}

delegate_impls!(
    &'_ T
    Box<T>
    std::rc::Rc<T>
    Arc<T>
);

impl<ResBody> OnClaimGateError for TerseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_token(&self) -> Response<Self::Body> {
        unauthorized("")
    }

    #[inline]
    fn on_invalid_token(&self) -> Response<Self::Body> {
        unauthorized("")
    }

    #[inline]
    fn on_insufficient_claims(&self, _: &MissingRequiredClaims) -> Response<Self::Body> {
        unauthorized("")
    }
}

impl<ResBody> OnClaimGateError for VerboseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_token(&self) -> Response<Self::Body> {
        unauthorized(GateRejection::MissingToken.reason())
    }

    #[inline]
    fn on_invalid_token(&self) -> Response<Self::Body> {
        unauthorized(GateRejection::InvalidToken.reason())
    }

    #[inline]
    fn on_insufficient_claims(&self, denial: &MissingRequiredClaims) -> Response<Self::Body> {
        forbidden(&denial.to_string())
    }
}

impl<ResBody> OnClaimGateError for GrpcErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_token(&self) -> Response<Self::Body> {
        grpc_unauthenticated()
    }

    #[inline]
    fn on_invalid_token(&self) -> Response<Self::Body> {
        grpc_unauthenticated()
    }

    #[inline]
    fn on_insufficient_claims(&self, _: &MissingRequiredClaims) -> Response<Self::Body> {
        grpc_unauthenticated()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use http::StatusCode;
    use serde_json::json;
    use stoke::{authority::FixedClaimsAuthority, required_claims, Claims};
    use tower::{service_fn, ServiceBuilder, ServiceExt};
    use tracing_test::traced_test;

    use super::*;

    // {"role":"eng","sub":"alice"}
    const ENG_TOKEN: &str = "Bearer e30.eyJyb2xlIjoiZW5nIiwic3ViIjoiYWxpY2UifQ.c2ln";

    fn gate() -> ClaimGate {
        ClaimGate::new(Arc::new(FixedClaimsAuthority::passthrough()))
            .with_required_claims(required_claims! { "role" => "eng" })
    }

    fn request(authorization: Option<&str>) -> Request<String> {
        let mut builder = Request::builder().uri("/widgets");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(String::new()).unwrap()
    }

    #[tokio::test]
    async fn admitted_request_carries_claims() -> Result<()> {
        let mut verify = VerifyClaims::<TerseErrorHandler<String>>::terse(gate());

        let request = verify
            .authorize(request(Some(ENG_TOKEN)))
            .await
            .map_err(|resp| color_eyre::eyre::eyre!("rejected with {}", resp.status()))?;

        let claims = request.extensions().get::<Claims>().unwrap();
        assert_eq!(claims.get_str("sub"), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn terse_handler_always_responds_unauthorized() {
        let mut verify = VerifyClaims::<TerseErrorHandler<String>>::terse(gate());

        // {"role":"ops"}
        let wrong_role = "Bearer e30.eyJyb2xlIjoib3BzIn0.c2ln";
        for header in [None, Some("Bearer garbage"), Some(wrong_role)] {
            let resp = verify.authorize(request(header)).await.unwrap_err();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{header:?}");
            assert_eq!(
                resp.headers()[header::WWW_AUTHENTICATE],
                r#"Bearer error="invalid_token""#
            );
        }

        assert!(logs_contain("request rejected"));
    }

    #[tokio::test]
    async fn verbose_handler_distinguishes_missing_claims() {
        let mut verify = VerifyClaims::<VerboseErrorHandler<String>>::verbose(gate());

        let resp = verify.authorize(request(None)).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="invalid_token" error_description="Missing Authorization Token""#
        );

        // {"role":"ops"}
        let resp = verify
            .authorize(request(Some("Bearer e30.eyJyb2xlIjoib3BzIn0.c2ln")))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="insufficient_scope" error_description="missing required claims: role""#
        );
    }

    #[tokio::test]
    async fn grpc_handler_reports_unauthenticated() {
        let mut verify = VerifyClaims::<GrpcErrorHandler<String>>::grpc(gate());

        let resp = verify
            .authorize(request(Some("Bearer garbage")))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["grpc-status"], "16");
        assert_eq!(resp.headers()["grpc-message"], "Unable to authenticate request");
    }

    #[tokio::test]
    async fn layer_guards_inner_service() -> Result<()> {
        let service = ServiceBuilder::new()
            .layer(VerifyClaims::<TerseErrorHandler<String>>::terse(gate()).layer())
            .service(service_fn(|req: Request<String>| async move {
                let sub = req
                    .extensions()
                    .get::<Claims>()
                    .and_then(|c| c.get_str("sub"))
                    .unwrap_or_default()
                    .to_owned();
                Ok::<_, std::convert::Infallible>(Response::new(sub))
            }));

        let resp = service.clone().oneshot(request(Some(ENG_TOKEN))).await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), "alice");

        let resp = service.oneshot(request(None)).await?;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.body().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn configured_claims_bypass_the_token() -> Result<()> {
        let claims = Claims::from_iter([("role".to_owned(), json!("eng"))]);
        let gate = ClaimGate::new(Arc::new(FixedClaimsAuthority::new(claims)))
            .with_required_claims(required_claims! { "role" => "eng" });
        let mut verify = VerifyClaims::<VerboseErrorHandler<String>>::verbose(gate);

        let request = verify
            .authorize(request(Some("Bearer e30.e30.c2ln")))
            .await
            .map_err(|resp| color_eyre::eyre::eyre!("rejected with {}", resp.status()))?;
        assert!(request.extensions().get::<Claims>().is_some());
        Ok(())
    }
}
