pub mod error;
pub mod proxy;
pub mod query;
pub mod signature;
pub mod version;

pub use error::ProxyError;
pub use proxy::SigningProxy;
pub use signature::SignatureEngine;
pub use version::VersionResolver;
