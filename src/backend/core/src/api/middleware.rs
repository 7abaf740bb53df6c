//! API middleware.

use axum::{
    extract::Request,
    http::header::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVICE_VERSION_HEADER: &str = "x-service-version";

/// Middleware that propagates or assigns a request id and adds standard
/// response headers.
pub async fn request_headers(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request_id_value = HeaderValue::from_str(&request_id).ok();
    if let Some(val) = request_id_value.clone() {
        req.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), val);
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let _ = headers.try_insert(
        HeaderName::from_static(SERVICE_VERSION_HEADER),
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    if let Some(val) = request_id_value {
        let _ = headers.try_insert(HeaderName::from_static(REQUEST_ID_HEADER), val);
    }
    let _ = headers.try_insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    response
}
