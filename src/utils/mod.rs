pub mod graceful_shutdown;
pub mod headers;

pub use graceful_shutdown::GracefulShutdown;
pub use headers::strip_hop_by_hop;
