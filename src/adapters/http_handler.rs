use std::sync::Arc;

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::any,
};
use eyre::{Result, WrapErr};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::{
        log_request_start, log_response, make_request_span, request_id_middleware,
    },
    core::SigningProxy,
};

/// HTTP entry point: serves the local endpoints and hands everything else to the proxy.
#[derive(Clone)]
pub struct HttpHandler {
    proxy: Arc<SigningProxy>,
}

impl HttpHandler {
    pub fn new(proxy: Arc<SigningProxy>) -> Self {
        Self { proxy }
    }

    /// Main request handler that routes requests appropriately
    pub async fn handle_request(&self, req: Request) -> Response {
        let path = req.uri().path();

        let result = match path {
            "/heartbeat" => self.handle_heartbeat(),
            "/health" => self.handle_health_check(),
            "/docs" => self.handle_docs(),
            _ if path.starts_with("/docs/") => self.handle_docs(),
            _ => return self.handle_proxy_request(req).await,
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Request handling error: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
    }

    async fn handle_proxy_request(&self, req: Request) -> Response {
        match self.proxy.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    tracing::error!("Proxy request failed: {}", e);
                } else {
                    tracing::info!("Proxy request rejected: {}", e);
                }
                e.into_response()
            }
        }
    }

    fn handle_heartbeat(&self) -> Result<Response> {
        json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
    }

    fn handle_health_check(&self) -> Result<Response> {
        let health_data = serde_json::json!({
            "status": "healthy",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "supportedVersions": self.proxy.versions().supported_version_paths(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        json_response(StatusCode::OK, health_data)
    }

    fn handle_docs(&self) -> Result<Response> {
        json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({
                "error": "Not Found",
                "message": "API documentation is not bundled with this deployment"
            }),
        )
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Result<Response> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(body.to_string()))
        .wrap_err("Failed to build JSON response")
}

async fn handle(State(handler): State<Arc<HttpHandler>>, req: Request) -> Response {
    handler.handle_request(req).await
}

/// Build the axum router: every method on every path goes through [`HttpHandler`].
pub fn router(handler: Arc<HttpHandler>) -> Router {
    Router::new()
        .route("/", any(handle))
        .route("/{*path}", any(handle))
        .with_state(handler)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_request(log_request_start)
                .on_response(log_response)
                .on_failure(()),
        )
        .layer(from_fn(request_id_middleware))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::{HttpClientAdapter, identity::AnonymousIdentity},
        config::ServerConfig,
        core::VersionResolver,
        ports::http_client::HttpClient,
    };

    fn create_test_router() -> Router {
        let config = ServerConfig::builder()
            .upstream("http://127.0.0.1:9", "key", "secret")
            .build()
            .unwrap();
        let versions = Arc::new(VersionResolver::new(&config.versions));
        let http_client =
            Arc::new(HttpClientAdapter::new().unwrap()) as Arc<dyn HttpClient>;
        let proxy =
            SigningProxy::new(&config, versions, Arc::new(AnonymousIdentity), http_client).unwrap();

        router(Arc::new(HttpHandler::new(Arc::new(proxy))))
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, http::HeaderMap, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_heartbeat_handler() {
        let (status, headers, body) = call(create_test_router(), "/heartbeat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let (status, _, body) = call(create_test_router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["supportedVersions"], serde_json::json!(["/v1"]));
    }

    #[tokio::test]
    async fn test_docs_never_reach_version_resolver() {
        let (status, _, body) = call(create_test_router(), "/docs/openapi.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.get("supportedVersions").is_none());
    }

    #[tokio::test]
    async fn test_unversioned_path_is_rejected() {
        let (status, _, body) = call(create_test_router(), "/products").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("API version required")
        );
    }

    #[tokio::test]
    async fn test_inbound_request_id_is_echoed() {
        let response = create_test_router()
            .oneshot(
                Request::builder()
                    .uri("/heartbeat")
                    .header("x-request-id", "req-42")
                    .body(AxumBody::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
    }
}
