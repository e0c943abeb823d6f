//! Axum middleware wrapped around every route.
use std::time::Duration;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Span;

use crate::tracing_setup::create_request_span;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id assigned to this request, or `"-"` when none is present.
pub fn request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Reuse the caller's `X-Request-ID` or generate a UUID, and echo it on the response.
///
/// Runs outside the trace layer so the request span sees the id.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty() && v.to_str().is_ok())
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("-"))
        });

    req.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

/// `make_span_with` hook for `TraceLayer`: one span per request carrying its id.
pub fn make_request_span(req: &Request) -> Span {
    create_request_span(req.method().as_str(), req.uri().path(), &request_id(req))
}

/// `on_request` hook for `TraceLayer`.
pub fn log_request_start(req: &Request, _span: &Span) {
    tracing::info!("Started processing {} {}", req.method(), req.uri().path());
}

/// `on_response` hook for `TraceLayer`: records status and latency on the request span.
pub fn log_response(response: &Response, latency: Duration, span: &Span) {
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", latency.as_millis() as u64);
    tracing::info!("Completed with {} in {:?}", response.status(), latency);
}
