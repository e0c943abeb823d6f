//! Identity providers selectable from configuration.
//!
//! * `anonymous` - never identifies anyone
//! * `header` - trusts a header set by an upstream authenticator
//! * `bearer` - maps `Authorization: Bearer <token>` through a static token table
//! * `session` - maps a session cookie through a static session table
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use http::{HeaderName, header, request::Parts};

use crate::{
    config::{IdentityConfig, IdentityKind},
    ports::identity::{CallerIdentity, IdentityError, IdentityProvider, IdentityResult},
};

/// Build the provider named by the configuration.
pub fn identity_provider_from_config(
    config: &IdentityConfig,
) -> eyre::Result<Arc<dyn IdentityProvider>> {
    let provider: Arc<dyn IdentityProvider> = match config.kind {
        IdentityKind::Anonymous => Arc::new(AnonymousIdentity),
        IdentityKind::Header => Arc::new(HeaderIdentity::new(&config.header, config.required)?),
        IdentityKind::Bearer => Arc::new(BearerTokenIdentity::new(config.tokens.clone())),
        IdentityKind::Session => Arc::new(SessionCookieIdentity::new(
            config.cookie.clone(),
            config.sessions.clone(),
        )),
    };
    tracing::info!("Using '{}' identity provider", provider.name());
    Ok(provider)
}

pub struct AnonymousIdentity;

#[async_trait]
impl IdentityProvider for AnonymousIdentity {
    async fn resolve_identity(&self, _parts: &Parts) -> IdentityResult<CallerIdentity> {
        Ok(CallerIdentity::anonymous())
    }

    fn name(&self) -> &'static str {
        "anonymous"
    }
}

/// Reads the caller id from a header.
pub struct HeaderIdentity {
    header: HeaderName,
    required: bool,
}

impl HeaderIdentity {
    pub fn new(header: &str, required: bool) -> eyre::Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| eyre::eyre!("Invalid identity header '{}': {}", header, e))?;
        Ok(Self { header, required })
    }
}

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn resolve_identity(&self, parts: &Parts) -> IdentityResult<CallerIdentity> {
        let value = parts
            .headers
            .get(&self.header)
            .map(|v| {
                v.to_str().map(|s| s.trim().to_string()).map_err(|_| {
                    IdentityError::Rejected(format!("{} is not valid text", self.header))
                })
            })
            .transpose()?
            .filter(|s| !s.is_empty());

        match value {
            Some(id) => Ok(CallerIdentity::new(id)),
            None if self.required => Err(IdentityError::Missing(self.header.to_string())),
            None => Ok(CallerIdentity::anonymous()),
        }
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// Looks bearer tokens up in a static table.
pub struct BearerTokenIdentity {
    tokens: HashMap<String, String>,
}

impl BearerTokenIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    fn bearer_token(parts: &Parts) -> Option<&str> {
        let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }
}

#[async_trait]
impl IdentityProvider for BearerTokenIdentity {
    async fn resolve_identity(&self, parts: &Parts) -> IdentityResult<CallerIdentity> {
        let token = Self::bearer_token(parts)
            .ok_or_else(|| IdentityError::Missing("bearer token".to_string()))?;

        self.tokens
            .get(token)
            .map(CallerIdentity::new)
            .ok_or_else(|| IdentityError::Rejected("unknown bearer token".to_string()))
    }

    fn name(&self) -> &'static str {
        "bearer"
    }
}

/// Looks a session cookie up in a static table.
pub struct SessionCookieIdentity {
    cookie: String,
    sessions: HashMap<String, String>,
}

impl SessionCookieIdentity {
    pub fn new(cookie: String, sessions: HashMap<String, String>) -> Self {
        Self { cookie, sessions }
    }

    fn session_id<'a>(&self, parts: &'a Parts) -> Option<&'a str> {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
impl IdentityProvider for SessionCookieIdentity {
    async fn resolve_identity(&self, parts: &Parts) -> IdentityResult<CallerIdentity> {
        let session_id = self
            .session_id(parts)
            .ok_or_else(|| IdentityError::Missing(format!("{} cookie", self.cookie)))?;

        self.sessions
            .get(session_id)
            .map(CallerIdentity::new)
            .ok_or_else(|| IdentityError::Rejected("unknown session".to_string()))
    }

    fn name(&self) -> &'static str {
        "session"
    }
}

#[cfg(test)]
mod tests {
    use http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/v1/orders");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_anonymous_identity() {
        let id = AnonymousIdentity
            .resolve_identity(&parts(&[("x-partner-user", "alice")]))
            .await
            .unwrap();
        assert!(id.is_anonymous());
    }

    #[tokio::test]
    async fn test_header_identity_optional() {
        let provider = HeaderIdentity::new("x-partner-user", false).unwrap();

        let id = provider
            .resolve_identity(&parts(&[("X-Partner-User", " alice ")]))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "alice");

        let missing = provider.resolve_identity(&parts(&[])).await.unwrap();
        assert!(missing.is_anonymous());
    }

    #[tokio::test]
    async fn test_header_identity_required() {
        let provider = HeaderIdentity::new("x-partner-user", true).unwrap();
        let err = provider.resolve_identity(&parts(&[])).await.unwrap_err();
        assert_eq!(err, IdentityError::Missing("x-partner-user".to_string()));
    }

    #[test]
    fn test_header_identity_rejects_bad_name() {
        assert!(HeaderIdentity::new("bad header", false).is_err());
    }

    #[tokio::test]
    async fn test_bearer_identity() {
        let provider =
            BearerTokenIdentity::new([("tok-1".to_string(), "user123".to_string())].into());

        let id = provider
            .resolve_identity(&parts(&[("authorization", "Bearer tok-1")]))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "user123");

        assert!(matches!(
            provider
                .resolve_identity(&parts(&[("authorization", "bearer nope")]))
                .await,
            Err(IdentityError::Rejected(_))
        ));
        assert!(matches!(
            provider
                .resolve_identity(&parts(&[("authorization", "Basic dXNlcjpwdw==")]))
                .await,
            Err(IdentityError::Missing(_))
        ));
        assert!(matches!(
            provider.resolve_identity(&parts(&[])).await,
            Err(IdentityError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_session_identity() {
        let provider = SessionCookieIdentity::new(
            "session_id".to_string(),
            [("abc".to_string(), "bob".to_string())].into(),
        );

        let id = provider
            .resolve_identity(&parts(&[("cookie", "theme=dark; session_id=abc")]))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "bob");

        assert!(matches!(
            provider
                .resolve_identity(&parts(&[("cookie", "session_id=zzz")]))
                .await,
            Err(IdentityError::Rejected(_))
        ));
        assert!(matches!(
            provider
                .resolve_identity(&parts(&[("cookie", "theme=dark")]))
                .await,
            Err(IdentityError::Missing(_))
        ));
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = IdentityConfig::default();
        assert_eq!(
            identity_provider_from_config(&config).unwrap().name(),
            "anonymous"
        );

        config.kind = IdentityKind::Session;
        assert_eq!(
            identity_provider_from_config(&config).unwrap().name(),
            "session"
        );
    }
}
