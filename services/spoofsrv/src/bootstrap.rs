//! Service bootstrap
//!
//! Command-line arguments and configuration loading for the `spoofsrv` binary.
//! Logging and banner helpers come from `common`.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use common::service_bootstrap::ServiceInfo;
use errors::MitmResult;

use crate::config::{ProxyConfig, DEFAULT_PORT};

pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for spoofsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "spoofsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus/TCP register spoofing proxy",
    long_about = None
)]
pub struct Args {
    /// YAML configuration file (defaults to config/spoofsrv.yaml when present)
    #[arg(short = 'c', long, env = "SPOOFSRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    pub listen: Option<String>,

    /// Upstream device address, overrides the config file
    #[arg(long)]
    pub upstream: Option<String>,

    #[command(flatten)]
    pub service: ServiceArgs,
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo::new(
        "spoofsrv",
        env!("CARGO_PKG_VERSION"),
        "Modbus/TCP Holding Register Spoofing Proxy",
        DEFAULT_PORT,
    )
}

/// Load the effective configuration: file and environment, then CLI overrides
pub fn load_config(args: &Args) -> MitmResult<ProxyConfig> {
    let config = ProxyConfig::load(args.config.as_deref())?
        .with_overrides(args.listen.clone(), args.upstream.clone());
    config.validate()?;

    info!(
        "Configuration loaded: listen={}, upstream={}",
        config.listen, config.upstream
    );
    Ok(config)
}
