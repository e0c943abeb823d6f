//! bff-signer - a backend-for-frontend proxy that signs partner traffic.
//!
//! Partners call the proxy with plain requests under a versioned path such as
//! `/v1/products?page=1`. The proxy:
//!
//! - resolves the API version and maps it to the gateway version it targets,
//! - identifies the caller through a pluggable [`IdentityProvider`],
//! - signs `METHOD|url|body|timestamp|recvWindow` with HMAC-SHA256 using the
//!   server-held API secret,
//! - forwards the signed request upstream and relays the response verbatim.
//!
//! Partners never see the secret, and nothing is sent upstream unsigned.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use bff_signer::{
//!     HttpClientAdapter, HttpHandler, SigningProxy, VersionResolver,
//!     adapters::{identity_provider_from_config, router},
//!     config::loader::load_config,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = load_config("config.toml").await?;
//! let versions = Arc::new(VersionResolver::new(&cfg.versions));
//! let identity = identity_provider_from_config(&cfg.identity)?;
//! let client = Arc::new(HttpClientAdapter::new()?);
//! let proxy = SigningProxy::new(&cfg, versions, identity, client)?;
//! let app = router(Arc::new(HttpHandler::new(Arc::new(proxy))));
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Traits live in `ports`, their implementations in `adapters`, and the
//! version/query/signature/pipeline logic in `core`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{ProxyError, SignatureEngine, SigningProxy, VersionResolver},
    ports::{http_client::HttpClient, identity::IdentityProvider},
    utils::GracefulShutdown,
};
