use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::request::Parts;
use thiserror::Error;

/// Error type for identity resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    /// The request carries no credential the provider can use
    #[error("Missing credential: {0}")]
    Missing(String),

    /// A credential was presented but is not recognised
    #[error("Credential rejected: {0}")]
    Rejected(String),

    /// The provider itself failed
    #[error("Identity provider failure: {0}")]
    Internal(String),
}

/// Result type alias for identity resolution
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Caller id forwarded upstream. Empty means the request proceeds anonymously.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// Standard base64 of the id bytes; the empty id encodes to the empty string.
    pub fn to_header_value(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }
}

/// IdentityProvider defines the port (interface) for extracting the caller from a request.
///
/// Implementations must be safe to call concurrently for unrelated requests and
/// keep no per-call state.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve the caller identity from the request head
    ///
    /// # Arguments
    /// * `parts` - Method, URI and headers of the inbound request
    ///
    /// # Returns
    /// The caller identity (possibly anonymous) or why it could not be established
    async fn resolve_identity(&self, parts: &Parts) -> IdentityResult<CallerIdentity>;

    /// Short provider name used in logs
    fn name(&self) -> &'static str;
}
