//! Pipeline failures and their HTTP rendering.
//!
//! Responses relayed from the upstream, whatever their status, are not errors
//! here; only failures that happen before or instead of an upstream response are.
use axum::{
    Json,
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::{
    core::version::VersionError,
    ports::{http_client::HttpClientError, identity::IdentityError},
};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("Identity resolution failed: {source}")]
    Identity {
        source: IdentityError,
        /// Status the configuration maps identity failures to
        status: StatusCode,
    },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Failed to build upstream request: {0}")]
    Internal(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(#[from] HttpClientError),
}

/// JSON error body returned to partners.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_versions: Option<Vec<String>>,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Version(_) | ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Identity { status, .. } => *status,
            ProxyError::Internal(_) | ProxyError::UpstreamUnreachable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body shown to the caller. Internal details stay in the logs.
    pub fn body(&self) -> ErrorBody {
        let status = self.status_code();
        let error = status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string();

        let (message, supported_versions) = match self {
            ProxyError::Version(VersionError::VersionRequired { supported_versions }) => (
                format!(
                    "API version required. Prefix the path with one of: {}",
                    supported_versions.join(", ")
                ),
                Some(supported_versions.clone()),
            ),
            ProxyError::Version(VersionError::UnsupportedVersion {
                version,
                supported_versions,
            }) => (
                format!(
                    "API version {version} is not supported. Supported versions: {}",
                    supported_versions.join(", ")
                ),
                Some(supported_versions.clone()),
            ),
            ProxyError::Identity { .. } if status.is_server_error() => {
                ("Internal server error".to_string(), None)
            }
            ProxyError::Identity { .. } => ("Unable to identify caller".to_string(), None),
            ProxyError::InvalidBody(_) => ("Request body is not valid JSON".to_string(), None),
            ProxyError::BodyTooLarge { limit } => {
                (format!("Request body exceeds the {limit} byte limit"), None)
            }
            ProxyError::Internal(_) => ("Internal server error".to_string(), None),
            ProxyError::UpstreamUnreachable(_) => {
                ("Failed to reach upstream service".to_string(), None)
            }
        };

        ErrorBody {
            error,
            message,
            supported_versions,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<AxumBody> {
        (self.status_code(), Json(self.body())).into_response()
    }
}
