//! Service bootstrap utilities
//!
//! Startup banner and logging initialization from the common arguments.

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use errors::MitmResult;
use tracing::{info, Level};

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "spoofsrv")
    pub name: String,
    /// Service version, normally the binary's `CARGO_PKG_VERSION`
    pub version: String,
    /// Service description
    pub description: String,
    /// Default listen port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
    info!("");
}

/// Initialize logging for a service with standard configuration
pub fn initialize_logging(args: &ServiceArgs, service: &ServiceInfo) -> MitmResult<()> {
    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir: args.log_dir.clone(),
        console_level: args.parse_log_level(),
        file_level: Level::DEBUG,
        enable_json: false,
        ansi: !args.no_color,
    };

    logging::init_logging(config)
}
