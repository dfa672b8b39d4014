//! Utilities for generating HTTP responses on authorization failures

use http::{header, HeaderValue, Response, StatusCode};

/// The `grpc-message` sent with every gRPC rejection
pub const GRPC_UNAUTHENTICATED_MESSAGE: &str = "Unable to authenticate request";

/// The gRPC status code for an unauthenticated call
pub const GRPC_STATUS_UNAUTHENTICATED: u16 = 16;

/// Build a `401 Unauthorized` response with the appropriate `www-authenticate`
/// header
///
/// The description provided will be automatically escaped to make sure it
/// is header-friendly.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn unauthorized<Body: Default>(description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        bearer_challenge("invalid_token", description),
    );
    resp
}

/// Build a `403 Forbidden` response with the appropriate `www-authenticate`
/// header
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn forbidden<Body: Default>(description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::FORBIDDEN;
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        bearer_challenge("insufficient_scope", description),
    );
    resp
}

/// Build a gRPC trailers-only response rejecting an unauthenticated call
///
/// gRPC carries its status in headers, so the HTTP status is always
/// `200 OK`.
///
/// ```http
/// HTTP/2 200 OK
/// content-type: application/grpc
/// grpc-status: 16
/// grpc-message: Unable to authenticate request
/// ```
pub fn grpc_unauthenticated<Body: Default>() -> Response<Body> {
    let mut resp = Response::new(Body::default());
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    headers.insert("grpc-status", HeaderValue::from(GRPC_STATUS_UNAUTHENTICATED));
    headers.insert(
        "grpc-message",
        HeaderValue::from_static(GRPC_UNAUTHENTICATED_MESSAGE),
    );
    resp
}

fn bearer_challenge(error: &str, description: &str) -> HeaderValue {
    // `escape_default` leaves only printable ASCII
    let challenge = if description.is_empty() {
        format!(r#"Bearer error="{error}""#)
    } else {
        format!(
            r#"Bearer error="{error}" error_description="{}""#,
            description.escape_default()
        )
    };

    HeaderValue::try_from(challenge).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn in_unauthorized_description_unicode_and_non_printing_description_does_not_panic() {
        let resp = unauthorized::<()>(
            "\0\n\ttest™: \"Ĉu oni povas bone ŝanĝi ĉi tiu mesaĝon en respondon?\"",
        );

        let headers = extract_www_authenticate_headers(&resp);

        let expected = BTreeSet::from([
            r#"Bearer error="invalid_token" error_description="\u{0}\n\ttest\u{2122}: \"\u{108}u oni povas bone \u{15d}an\u{11d}i \u{109}i tiu mesa\u{11d}on en respondon?\"""#,
        ]);

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(headers, expected);
    }

    #[test]
    fn in_unauthorized_with_empty_description_doesnt_include_description() {
        let resp = unauthorized::<()>("");

        let headers = extract_www_authenticate_headers(&resp);

        let expected = BTreeSet::from([r#"Bearer error="invalid_token""#]);

        assert_eq!(headers, expected);
    }

    #[test]
    fn in_forbidden_description_is_escaped() {
        let resp = forbidden::<()>("missing required claims: \"role\"");

        let headers = extract_www_authenticate_headers(&resp);

        let expected = BTreeSet::from([
            r#"Bearer error="insufficient_scope" error_description="missing required claims: \"role\"""#,
        ]);

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(headers, expected);
    }

    #[test]
    fn in_forbidden_with_empty_description_doesnt_include_description() {
        let resp = forbidden::<()>("");

        let headers = extract_www_authenticate_headers(&resp);

        let expected = BTreeSet::from([r#"Bearer error="insufficient_scope""#]);

        assert_eq!(headers, expected);
    }

    #[test]
    fn grpc_rejection_uses_trailers_only_status() {
        let resp = grpc_unauthenticated::<()>();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/grpc");
        assert_eq!(resp.headers()["grpc-status"], "16");
        assert_eq!(
            resp.headers()["grpc-message"],
            "Unable to authenticate request"
        );
        assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    fn extract_www_authenticate_headers<B>(resp: &Response<B>) -> BTreeSet<&str> {
        resp.headers()
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect::<BTreeSet<_>>()
    }
}
