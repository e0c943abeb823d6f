use std::net::SocketAddr;

use http::{HeaderName, StatusCode};

use crate::{
    config::models::{HeaderNames, IdentityConfig, IdentityKind, ServerConfig},
    core::version::VERSION_TOKEN,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, collecting every problem found.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_url(&config.upstream.base_url, "upstream.base_url") {
            errors.push(e);
        }

        if config.upstream.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "upstream.api_key".to_string(),
            });
        }
        if config.upstream.api_secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "upstream.api_secret".to_string(),
            });
        }
        if config.upstream.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "upstream.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        errors.extend(Self::validate_versions(config));
        errors.extend(Self::validate_header_names(&config.headers));
        errors.extend(Self::validate_identity(&config.identity));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_url(url: &str, field: &str) -> ValidationResult<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("URL '{url}' must start with http:// or https://"),
            });
        }

        match url::Url::parse(url) {
            Ok(parsed) if parsed.host_str().is_some() => Ok(()),
            Ok(_) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("URL '{url}' has no host"),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid URL '{url}': {e}"),
            }),
        }
    }

    fn validate_versions(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let versions = &config.versions;
        let token = &*VERSION_TOKEN;

        if versions.supported.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "versions.supported".to_string(),
            });
        }

        for version in &versions.supported {
            if !token.is_match(version) {
                errors.push(ValidationError::InvalidField {
                    field: "versions.supported".to_string(),
                    message: format!("'{version}' is not a version token like 'v1'"),
                });
            }
        }

        if !token.is_match(&versions.default) {
            errors.push(ValidationError::InvalidField {
                field: "versions.default".to_string(),
                message: format!("'{}' is not a version token like 'v1'", versions.default),
            });
        } else if !versions
            .supported
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&versions.default))
        {
            errors.push(ValidationError::InvalidField {
                field: "versions.default".to_string(),
                message: format!("'{}' is not one of the supported versions", versions.default),
            });
        }

        for (from, to) in &versions.gateway_map {
            if !token.is_match(from) || !token.is_match(to) {
                errors.push(ValidationError::InvalidField {
                    field: format!("versions.gateway_map.{from}"),
                    message: format!("'{from}' -> '{to}' must map version tokens like 'v1'"),
                });
            }
        }

        errors
    }

    fn validate_header_names(headers: &HeaderNames) -> Vec<ValidationError> {
        [
            ("headers.api_key", &headers.api_key),
            ("headers.signature", &headers.signature),
            ("headers.timestamp", &headers.timestamp),
            ("headers.recv_window", &headers.recv_window),
            ("headers.user_id", &headers.user_id),
        ]
        .into_iter()
        .filter(|(_, name)| HeaderName::from_bytes(name.as_bytes()).is_err())
        .map(|(field, name)| ValidationError::InvalidField {
            field: field.to_string(),
            message: format!("'{name}' is not a valid HTTP header name"),
        })
        .collect()
    }

    fn validate_identity(identity: &IdentityConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match StatusCode::from_u16(identity.failure_status) {
            Ok(status) if status.is_client_error() || status.is_server_error() => {}
            _ => errors.push(ValidationError::InvalidField {
                field: "identity.failure_status".to_string(),
                message: format!(
                    "{} is not a 4xx or 5xx status code",
                    identity.failure_status
                ),
            }),
        }

        match identity.kind {
            IdentityKind::Header => {
                if HeaderName::from_bytes(identity.header.as_bytes()).is_err() {
                    errors.push(ValidationError::InvalidField {
                        field: "identity.header".to_string(),
                        message: format!("'{}' is not a valid HTTP header name", identity.header),
                    });
                }
            }
            IdentityKind::Bearer if identity.tokens.is_empty() => {
                errors.push(ValidationError::MissingField {
                    field: "identity.tokens".to_string(),
                });
            }
            IdentityKind::Session => {
                if identity.cookie.trim().is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "identity.cookie".to_string(),
                    });
                }
                if identity.sessions.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "identity.sessions".to_string(),
                    });
                }
            }
            _ => {}
        }

        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::VersionSettings;

    fn valid_config() -> ServerConfig {
        ServerConfig::builder()
            .upstream("https://gateway.example.com", "key", "secret")
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ServerConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = valid_config();
        config.listen_addr = "localhost".to_string();
        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = valid_config();
        config.upstream.base_url = "gateway.example.com".to_string();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("upstream.base_url"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut config = valid_config();
        config.upstream.api_secret = String::new();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("upstream.api_secret"));
    }

    #[test]
    fn test_bad_version_tokens_collected() {
        let mut config = valid_config();
        config.versions = VersionSettings {
            supported: vec!["v1".to_string(), "latest".to_string()],
            default: "one".to_string(),
            gateway_map: [("v1".to_string(), "beta".to_string())].into(),
        };

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'latest'"));
        assert!(message.contains("versions.default"));
        assert!(message.contains("versions.gateway_map.v1"));
    }

    #[test]
    fn test_default_must_be_supported() {
        let mut config = valid_config();
        config.versions.supported = vec!["v2".to_string()];
        config.versions.default = "v1".to_string();

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("not one of the supported versions"));
    }

    #[test]
    fn test_invalid_header_name() {
        let mut config = valid_config();
        config.headers.signature = "x signature".to_string();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("headers.signature"));
    }

    #[test]
    fn test_identity_failure_status_must_be_error() {
        let mut config = valid_config();
        config.identity.failure_status = 200;
        assert!(ServerConfigValidator::validate(&config).is_err());

        config.identity.failure_status = 401;
        assert!(ServerConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_bearer_requires_tokens() {
        let mut config = valid_config();
        config.identity.kind = IdentityKind::Bearer;
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("identity.tokens"));
    }
}
