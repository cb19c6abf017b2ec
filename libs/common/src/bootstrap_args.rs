//! Common command-line arguments
//!
//! Services flatten these into their own `Args` or convert into them.

use std::path::PathBuf;

use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Directory for rolling log files (console only when omitted)
    #[arg(long, env = "SPOOFSRV_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    ///
    /// `RUST_LOG` style directives (`spoofsrv=debug,info`) fall back to INFO;
    /// the console filter still honours the full directive.
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
