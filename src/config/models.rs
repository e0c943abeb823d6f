//! Configuration data structures for the signing proxy.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! serde‑friendly and include defaults so that minimal configs remain concise.
//! Everything here is read once at startup and shared behind `Arc` afterwards.
use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// Version used when the configured default is not one of the supported versions.
pub const FALLBACK_VERSION: &str = "v1";

/// Timeout applied to every upstream call unless configured otherwise.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_SECS
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Upstream gateway location and the credentials used to sign for it.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to, e.g. `https://gateway.example.com`
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// Split out the signing credentials.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Upstream API key and secret. Both values are redacted from `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials { .. }")
    }
}

/// Partner-facing API versions and how they map onto upstream versions.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VersionSettings {
    /// Version tokens partners may use, e.g. `["v1", "v2"]`
    pub supported: Vec<String>,
    /// Upstream version used for supported tokens missing from `gateway_map`
    pub default: String,
    /// Partner version token -> upstream version token
    pub gateway_map: HashMap<String, String>,
}

impl Default for VersionSettings {
    fn default() -> Self {
        Self {
            supported: vec![FALLBACK_VERSION.to_string()],
            default: FALLBACK_VERSION.to_string(),
            gateway_map: HashMap::new(),
        }
    }
}

/// Names of the headers written to (and, for the receive window, read from) requests.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HeaderNames {
    pub api_key: String,
    pub signature: String,
    pub timestamp: String,
    pub recv_window: String,
    pub user_id: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            api_key: "x-api-key".to_string(),
            signature: "x-signature".to_string(),
            timestamp: "x-timestamp".to_string(),
            recv_window: "x-recv-window".to_string(),
            user_id: "x-user-id".to_string(),
        }
    }
}

/// Which identity provider resolves the caller.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    #[default]
    Anonymous,
    Header,
    Bearer,
    Session,
}

fn default_failure_status() -> u16 {
    500
}

/// Identity provider selection and its settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub kind: IdentityKind,
    /// Header carrying the caller id (`header` kind)
    #[serde(default = "default_identity_header")]
    pub header: String,
    /// Cookie carrying the session id (`session` kind)
    #[serde(default = "default_session_cookie")]
    pub cookie: String,
    /// Fail instead of proceeding anonymously when the header is missing (`header` kind)
    #[serde(default)]
    pub required: bool,
    /// Bearer token -> caller id (`bearer` kind)
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Session id -> caller id (`session` kind)
    #[serde(default)]
    pub sessions: HashMap<String, String>,
    /// HTTP status returned when identity resolution fails
    #[serde(default = "default_failure_status")]
    pub failure_status: u16,
}

fn default_identity_header() -> String {
    "x-partner-user".to_string()
}

fn default_session_cookie() -> String {
    "session_id".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            kind: IdentityKind::default(),
            header: default_identity_header(),
            cookie: default_session_cookie(),
            required: false,
            tokens: HashMap::new(),
            sessions: HashMap::new(),
            failure_status: default_failure_status(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub versions: VersionSettings,
    #[serde(default)]
    pub headers: HeaderNames,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig, mostly useful for tests and embedding.
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    upstream: Option<UpstreamConfig>,
    versions: Option<VersionSettings>,
    headers: Option<HeaderNames>,
    identity: Option<IdentityConfig>,
    logging: Option<LoggingConfig>,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the upstream base URL and credentials
    pub fn upstream(
        mut self,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.upstream = Some(UpstreamConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        });
        self
    }

    pub fn versions(mut self, versions: VersionSettings) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn headers(mut self, headers: HeaderNames) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        let upstream = self
            .upstream
            .ok_or_else(|| "upstream is required".to_string())?;

        Ok(ServerConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            upstream,
            versions: self.versions.unwrap_or_default(),
            headers: self.headers.unwrap_or_default(),
            identity: self.identity.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_upstream() {
        assert!(ServerConfig::builder().build().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = ServerConfig::builder()
            .upstream("http://localhost:9000", "key", "secret")
            .build()
            .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.versions.supported, vec!["v1".to_string()]);
        assert_eq!(config.headers.recv_window, "x-recv-window");
        assert_eq!(config.identity.kind, IdentityKind::Anonymous);
        assert_eq!(config.identity.failure_status, 500);
    }

    #[test]
    fn test_secrets_are_redacted_from_debug() {
        let config = ServerConfig::builder()
            .upstream("http://localhost:9000", "key-123", "very-secret")
            .build()
            .unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("key-123"));
        assert!(!format!("{:?}", config.upstream.credentials()).contains("very-secret"));
    }
}
