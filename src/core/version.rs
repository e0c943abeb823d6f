//! Path-based API version resolution.
//!
//! Partners address the proxy as `/v{N}/...`. The resolver validates the token
//! against the configured supported set and rewrites the path onto the upstream
//! gateway version. It performs no I/O and is shared read-only across requests.
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::config::{FALLBACK_VERSION, VersionSettings};

/// Leading version token, e.g. `/v2/orders` or `V2`.
static VERSIONED_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^/?(v\d+)(/.*)?$").expect("version path regex is valid"));

/// A bare version token such as `v1`.
pub static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^v\d+$").expect("version token regex is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("API version required")]
    VersionRequired { supported_versions: Vec<String> },

    #[error("API version {version} is not supported")]
    UnsupportedVersion {
        version: String,
        supported_versions: Vec<String>,
    },
}

/// Outcome of resolving a partner path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Version token the partner asked for, lowercased
    pub requested: String,
    /// Version token the upstream exposes
    pub gateway: String,
    /// `/{gateway}{remainder}`
    pub upstream_path: String,
}

/// Immutable version table built once at startup.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    supported: Vec<String>,
    supported_set: HashSet<String>,
    default_version: String,
    gateway_map: HashMap<String, String>,
}

impl VersionResolver {
    pub fn new(settings: &VersionSettings) -> Self {
        let mut supported = Vec::with_capacity(settings.supported.len());
        for version in &settings.supported {
            let version = version.to_ascii_lowercase();
            if !supported.contains(&version) {
                supported.push(version);
            }
        }
        let supported_set: HashSet<String> = supported.iter().cloned().collect();

        let configured_default = settings.default.to_ascii_lowercase();
        let default_version = if supported_set.contains(&configured_default) {
            configured_default
        } else {
            tracing::warn!(
                "Default version '{}' is not in the supported set {:?}; falling back to '{}'",
                settings.default,
                supported,
                FALLBACK_VERSION
            );
            FALLBACK_VERSION.to_string()
        };

        let gateway_map = settings
            .gateway_map
            .iter()
            .map(|(from, to)| (from.to_ascii_lowercase(), to.to_ascii_lowercase()))
            .collect();

        Self {
            supported,
            supported_set,
            default_version,
            gateway_map,
        }
    }

    /// Supported partner versions in configuration order.
    pub fn supported_versions(&self) -> &[String] {
        &self.supported
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// Supported versions formatted as path prefixes (`/v1`), as shown in error bodies.
    pub fn supported_version_paths(&self) -> Vec<String> {
        self.supported.iter().map(|v| format!("/{v}")).collect()
    }

    /// Map a partner token onto the upstream token. Unknown tokens map to the default.
    pub fn resolve_gateway_version(&self, version: &str) -> String {
        self.gateway_map
            .get(&version.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| self.default_version.clone())
    }

    /// Validate the version prefix of `path` and rewrite it for the upstream.
    pub fn resolve(&self, path: &str) -> Result<ResolvedVersion, VersionError> {
        let captures =
            VERSIONED_PATH
                .captures(path)
                .ok_or_else(|| VersionError::VersionRequired {
                    supported_versions: self.supported_version_paths(),
                })?;

        let requested = captures[1].to_ascii_lowercase();
        if !self.supported_set.contains(&requested) {
            return Err(VersionError::UnsupportedVersion {
                version: requested,
                supported_versions: self.supported_version_paths(),
            });
        }

        let remainder = captures.get(2).map_or("", |m| m.as_str());
        let gateway = self.resolve_gateway_version(&requested);
        let upstream_path = format!("/{gateway}{remainder}");

        Ok(ResolvedVersion {
            requested,
            gateway,
            upstream_path,
        })
    }
}
