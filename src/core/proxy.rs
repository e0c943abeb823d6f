//! The signing/forwarding pipeline.
//!
//! Each request walks `RECEIVED → VERSION_RESOLVED → IDENTITY_RESOLVED → SIGNED
//! → DISPATCHED → RESPONDED`, or stops in `ERRORED`. Nothing is retried and
//! nothing reaches the upstream before signing succeeds.
use std::{fmt, sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header};
use http_body_util::LengthLimitError;
use serde_json::Value;
use tracing::Instrument;

use crate::{
    config::{HeaderNames, ServerConfig},
    core::{
        error::ProxyError,
        query::QueryParams,
        signature::{Signature, SignatureEngine, SigningContext, parse_recv_window},
        version::VersionResolver,
    },
    ports::{
        http_client::HttpClient,
        identity::{CallerIdentity, IdentityProvider},
    },
    tracing_setup::create_upstream_span,
    utils::headers::strip_hop_by_hop,
};

/// Largest inbound body accepted for signing.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Lifecycle of one proxied request, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    VersionResolved,
    IdentityResolved,
    Signed,
    Dispatched,
    Responded,
    Errored,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "RECEIVED",
            RequestState::VersionResolved => "VERSION_RESOLVED",
            RequestState::IdentityResolved => "IDENTITY_RESOLVED",
            RequestState::Signed => "SIGNED",
            RequestState::Dispatched => "DISPATCHED",
            RequestState::Responded => "RESPONDED",
            RequestState::Errored => "ERRORED",
        };
        f.write_str(name)
    }
}

/// Parsed header names for the signed outbound request.
#[derive(Debug, Clone)]
pub struct SignedHeaderNames {
    pub api_key: HeaderName,
    pub signature: HeaderName,
    pub timestamp: HeaderName,
    pub recv_window: HeaderName,
    pub user_id: HeaderName,
}

impl SignedHeaderNames {
    pub fn from_config(names: &HeaderNames) -> eyre::Result<Self> {
        let parse = |field: &str, value: &str| {
            HeaderName::from_bytes(value.as_bytes())
                .map_err(|e| eyre::eyre!("Invalid header name for {}: '{}' ({})", field, value, e))
        };

        Ok(Self {
            api_key: parse("api_key", &names.api_key)?,
            signature: parse("signature", &names.signature)?,
            timestamp: parse("timestamp", &names.timestamp)?,
            recv_window: parse("recv_window", &names.recv_window)?,
            user_id: parse("user_id", &names.user_id)?,
        })
    }
}

/// Signs partner requests and forwards them upstream.
///
/// Built once at startup; every field is read-only afterwards, so one instance
/// serves any number of concurrent requests behind an `Arc`.
pub struct SigningProxy {
    versions: Arc<VersionResolver>,
    engine: SignatureEngine,
    identity: Arc<dyn IdentityProvider>,
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    headers: SignedHeaderNames,
    timeout: Duration,
    identity_failure_status: StatusCode,
}

impl SigningProxy {
    pub fn new(
        config: &ServerConfig,
        versions: Arc<VersionResolver>,
        identity: Arc<dyn IdentityProvider>,
        http_client: Arc<dyn HttpClient>,
    ) -> eyre::Result<Self> {
        let identity_failure_status = StatusCode::from_u16(config.identity.failure_status)
            .map_err(|e| {
                eyre::eyre!(
                    "Invalid identity failure status {}: {}",
                    config.identity.failure_status,
                    e
                )
            })?;

        Ok(Self {
            versions,
            engine: SignatureEngine::new(Arc::new(config.upstream.credentials())),
            identity,
            http_client,
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            headers: SignedHeaderNames::from_config(&config.headers)?,
            timeout: Duration::from_secs(config.upstream.timeout_secs),
            identity_failure_status,
        })
    }

    pub fn versions(&self) -> &VersionResolver {
        &self.versions
    }

    /// Run the whole pipeline for one request. Upstream responses are returned
    /// as-is (minus hop-by-hop headers) whatever their status.
    pub async fn forward(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, ProxyError> {
        let result = self.run(req).await;
        if let Err(e) = &result {
            tracing::debug!(state = %RequestState::Errored, "Request failed: {}", e);
        }
        result
    }

    async fn run(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, ProxyError> {
        let (parts, body) = req.into_parts();
        tracing::debug!(state = %RequestState::Received, "{} {}", parts.method, parts.uri.path());

        let resolved = self.versions.resolve(parts.uri.path())?;
        tracing::debug!(
            state = %RequestState::VersionResolved,
            requested = %resolved.requested,
            gateway = %resolved.gateway,
            upstream_path = %resolved.upstream_path,
            "Version resolved"
        );

        let identity = self.identity.resolve_identity(&parts).await.map_err(|source| {
            tracing::warn!(
                "Identity provider '{}' failed: {}",
                self.identity.name(),
                source
            );
            ProxyError::Identity {
                source,
                status: self.identity_failure_status,
            }
        })?;
        tracing::debug!(
            state = %RequestState::IdentityResolved,
            anonymous = identity.is_anonymous(),
            "Identity resolved"
        );

        let body = read_json_body(body).await?;
        let query = QueryParams::parse(parts.uri.query().unwrap_or(""));
        let recv_window = parse_recv_window(parts.headers.get(&self.headers.recv_window));
        let context = SigningContext::new(
            parts.method.clone(),
            resolved.upstream_path,
            query,
            body.as_ref(),
            recv_window,
        );
        let signature = self.engine.sign(&context);
        tracing::debug!(state = %RequestState::Signed, timestamp = signature.timestamp, "Signed");

        let content_type = parts.headers.get(header::CONTENT_TYPE).cloned();
        let outbound = self.build_upstream_request(&context, &signature, &identity, content_type)?;

        tracing::debug!(state = %RequestState::Dispatched, uri = %outbound.uri(), "Dispatching");
        let span = create_upstream_span(&self.base_url, context.method().as_str(), context.path());
        let mut response = self
            .http_client
            .send_request(outbound, self.timeout)
            .instrument(span.clone())
            .await?;
        span.record("http.status_code", response.status().as_u16());

        strip_hop_by_hop(response.headers_mut());
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            tracing::warn!("Upstream responded with {}", status);
        }
        tracing::debug!(state = %RequestState::Responded, status = status.as_u16(), "Responded");

        Ok(response)
    }

    /// Assemble the signed request sent to `{base_url}{path}?{query}`.
    pub fn build_upstream_request(
        &self,
        context: &SigningContext,
        signature: &Signature,
        identity: &CallerIdentity,
        content_type: Option<HeaderValue>,
    ) -> Result<Request<AxumBody>, ProxyError> {
        let mut uri = format!("{}{}", self.base_url, context.path());
        if !context.query().is_empty() {
            uri.push('?');
            uri.push_str(&context.query().to_encoded_string());
        }

        let mut headers = HeaderMap::new();
        headers.insert(&self.headers.api_key, header_value(self.engine.api_key())?);
        headers.insert(&self.headers.signature, header_value(&signature.value)?);
        headers.insert(
            &self.headers.timestamp,
            HeaderValue::from(signature.timestamp),
        );
        headers.insert(
            &self.headers.recv_window,
            HeaderValue::from(signature.recv_window),
        );
        headers.insert(
            &self.headers.user_id,
            header_value(&identity.to_header_value())?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            content_type.unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
        );

        let body = if context.body().is_empty() {
            AxumBody::empty()
        } else {
            AxumBody::from(context.body().to_string())
        };

        let mut request = Request::builder()
            .method(context.method().clone())
            .uri(&uri)
            .body(body)
            .map_err(|e| ProxyError::Internal(format!("{uri}: {e}")))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value)
        .map_err(|e| ProxyError::Internal(format!("Invalid header value: {e}")))
}

/// Buffer the inbound body and parse it as JSON. An empty body means no body.
async fn read_json_body(body: AxumBody) -> Result<Option<Value>, ProxyError> {
    let bytes: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            if is_length_limit(&e) {
                ProxyError::BodyTooLarge {
                    limit: MAX_BODY_BYTES,
                }
            } else {
                ProxyError::InvalidBody(e.to_string())
            }
        })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ProxyError::InvalidBody(e.to_string()))
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::identity::{AnonymousIdentity, HeaderIdentity},
        config::VersionSettings,
        core::signature::hmac_sha256_hex,
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    /// Records the outbound request and answers with a canned response.
    struct RecordingClient {
        seen: Mutex<Option<(http::request::Parts, Bytes)>>,
        status: StatusCode,
        fail: bool,
    }

    impl RecordingClient {
        fn new(status: StatusCode) -> Self {
            Self {
                seen: Mutex::new(None),
                status,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(StatusCode::OK)
            }
        }

        fn seen(&self) -> (http::request::Parts, Bytes) {
            self.seen.lock().unwrap().take().expect("no request recorded")
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            _timeout: Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await.unwrap().to_bytes();
            *self.seen.lock().unwrap() = Some((parts, bytes));

            if self.fail {
                return Err(HttpClientError::Timeout(30));
            }
            Ok(Response::builder()
                .status(self.status)
                .header("connection", "keep-alive")
                .header("keep-alive", "timeout=5")
                .header("transfer-encoding", "chunked")
                .header("upgrade", "h2c")
                .header("x-upstream", "yes")
                .body(AxumBody::from(r#"{"ok":true}"#))
                .unwrap())
        }
    }

    fn config() -> ServerConfig {
        ServerConfig::builder()
            .upstream("http://upstream.test/", "partner-key", "partner-secret")
            .versions(VersionSettings {
                supported: vec!["v1".to_string(), "v2".to_string()],
                default: "v1".to_string(),
                gateway_map: [("v2".to_string(), "v3".to_string())].into(),
            })
            .build()
            .unwrap()
    }

    fn proxy(client: Arc<RecordingClient>, identity: Arc<dyn IdentityProvider>) -> SigningProxy {
        let config = config();
        let versions = Arc::new(VersionResolver::new(&config.versions));
        SigningProxy::new(&config, versions, identity, client).unwrap()
    }

    fn header<'a>(parts: &'a http::request::Parts, name: &str) -> &'a str {
        parts.headers.get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_get_is_signed_with_default_recv_window() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let req = Request::get("/v1/copy-bots").body(AxumBody::empty()).unwrap();
        let response = proxy.forward(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (parts, body) = client.seen();
        assert_eq!(parts.uri, "http://upstream.test/v1/copy-bots");
        assert!(body.is_empty());
        assert_eq!(header(&parts, "x-api-key"), "partner-key");
        assert_eq!(header(&parts, "x-recv-window"), "5000");
        assert_eq!(header(&parts, "x-user-id"), "");
        assert_eq!(header(&parts, "content-type"), "application/json");

        let timestamp = header(&parts, "x-timestamp");
        let expected = hmac_sha256_hex(
            "partner-secret",
            &format!("GET|%2Fv1%2Fcopy-bots||{timestamp}|5000"),
        );
        assert_eq!(header(&parts, "x-signature"), expected);
    }

    #[tokio::test]
    async fn test_recv_window_header_is_used() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let req = Request::get("/v1/copy-bots")
            .header("x-recv-window", "10000")
            .body(AxumBody::empty())
            .unwrap();
        proxy.forward(req).await.unwrap();

        let (parts, _) = client.seen();
        assert_eq!(header(&parts, "x-recv-window"), "10000");
        let timestamp = header(&parts, "x-timestamp");
        let expected = hmac_sha256_hex(
            "partner-secret",
            &format!("GET|%2Fv1%2Fcopy-bots||{timestamp}|10000"),
        );
        assert_eq!(header(&parts, "x-signature"), expected);
    }

    #[tokio::test]
    async fn test_post_body_and_mapped_version() {
        let client = Arc::new(RecordingClient::new(StatusCode::CREATED));
        let proxy = proxy(
            client.clone(),
            Arc::new(HeaderIdentity::new("x-partner-user", false).unwrap()),
        );

        let req = Request::post("/v2/copy-bots?filter[status]=active")
            .header("x-partner-user", "user123")
            .header("content-type", "application/json; charset=utf-8")
            .body(AxumBody::from(r#"{ "name": "X" }"#))
            .unwrap();
        let response = proxy.forward(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let (parts, body) = client.seen();
        assert_eq!(
            parts.uri,
            "http://upstream.test/v3/copy-bots?filter%5Bstatus%5D=active"
        );
        assert_eq!(body, Bytes::from_static(br#"{"name":"X"}"#));
        assert_eq!(header(&parts, "x-user-id"), STANDARD.encode("user123"));
        assert_eq!(
            header(&parts, "content-type"),
            "application/json; charset=utf-8"
        );

        let timestamp = header(&parts, "x-timestamp");
        let expected = hmac_sha256_hex(
            "partner-secret",
            &format!(
                r#"POST|%2Fv3%2Fcopy-bots%3Ffilter%5Bstatus%5D%3Dactive|{{"name":"X"}}|{timestamp}|5000"#
            ),
        );
        assert_eq!(header(&parts, "x-signature"), expected);
    }

    #[tokio::test]
    async fn test_relay_strips_hop_by_hop_headers() {
        let client = Arc::new(RecordingClient::new(StatusCode::UNPROCESSABLE_ENTITY));
        let proxy = proxy(client, Arc::new(AnonymousIdentity));

        let req = Request::delete("/v1/copy-bots/7").body(AxumBody::empty()).unwrap();
        let response = proxy.forward(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        for name in ["connection", "keep-alive", "transfer-encoding", "upgrade"] {
            assert!(!response.headers().contains_key(name));
        }
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(br#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_version_errors_never_reach_upstream() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let missing = proxy
            .forward(Request::get("/products").body(AxumBody::empty()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

        let unsupported = proxy
            .forward(Request::get("/v99/products").body(AxumBody::empty()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            unsupported.body().supported_versions,
            Some(vec!["/v1".to_string(), "/v2".to_string()])
        );

        assert!(client.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_failure_is_internal_error() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(
            client.clone(),
            Arc::new(HeaderIdentity::new("x-partner-user", true).unwrap()),
        );

        let err = proxy
            .forward(Request::get("/v1/me").body(AxumBody::empty()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(client.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_rejected() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let err = proxy
            .forward(
                Request::post("/v1/copy-bots")
                    .body(AxumBody::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBody(_)));
        assert!(client.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_dispatch() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let err = proxy
            .forward(
                Request::post("/v1/copy-bots")
                    .body(AxumBody::from(vec![b' '; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { .. }));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(client.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_integral_floats_are_sent_as_signed() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = proxy(client.clone(), Arc::new(AnonymousIdentity));

        let req = Request::post("/v1/orders")
            .body(AxumBody::from(r#"{"qty":1.0,"price":2.50}"#))
            .unwrap();
        proxy.forward(req).await.unwrap();

        let (parts, body) = client.seen();
        assert_eq!(body, Bytes::from_static(br#"{"qty":1,"price":2.5}"#));
        let timestamp = header(&parts, "x-timestamp");
        let expected = hmac_sha256_hex(
            "partner-secret",
            &format!(r#"POST|%2Fv1%2Forders|{{"qty":1,"price":2.5}}|{timestamp}|5000"#),
        );
        assert_eq!(header(&parts, "x-signature"), expected);
    }

    #[tokio::test]
    async fn test_transport_failure_is_unreachable() {
        let proxy = proxy(Arc::new(RecordingClient::failing()), Arc::new(AnonymousIdentity));

        let err = proxy
            .forward(Request::get("/v1/copy-bots").body(AxumBody::empty()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnreachable(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_request_state_names() {
        assert_eq!(RequestState::IdentityResolved.to_string(), "IDENTITY_RESOLVED");
        assert_eq!(RequestState::Errored.to_string(), "ERRORED");
    }

    #[test]
    fn test_empty_object_body_is_not_forwarded() {
        let proxy = proxy(
            Arc::new(RecordingClient::new(StatusCode::OK)),
            Arc::new(AnonymousIdentity),
        );
        let body = json!({});
        let context = SigningContext::with_timestamp(
            http::Method::POST,
            "/v1/a",
            QueryParams::new(),
            Some(&body),
            5000,
            1,
        );
        let signature = proxy.engine.sign(&context);
        let req = proxy
            .build_upstream_request(&context, &signature, &CallerIdentity::anonymous(), None)
            .unwrap();
        assert_eq!(req.headers().get("x-timestamp").unwrap(), "1");
        assert_eq!(context.body(), "");
    }
}
