use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests upstream
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request and wait at most `timeout` for the response head
    ///
    /// # Arguments
    /// * `req` - The fully built outbound request (absolute URI)
    /// * `timeout` - Upper bound for the whole exchange up to the response head
    ///
    /// # Returns
    /// Any response the upstream produced, whatever its status, or a transport error
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}
