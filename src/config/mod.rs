//! Proxy configuration: models, file + `BFF_*` environment loading, validation.
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::load_config;
pub use models::*;
pub use validation::{ServerConfigValidator, ValidationError, ValidationResult};
