//! Shared service plumbing for the spoofing proxy
//!
//! Provides the pieces every binary in the workspace needs:
//! - logging initialization
//! - shutdown signal handling
//! - common command-line arguments and startup banner

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;
