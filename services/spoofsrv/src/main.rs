//! Modbus/TCP spoofing proxy service

use clap::Parser;
use tracing::info;

use common::service_bootstrap::{self, print_startup_banner};
use common::shutdown::cancel_on_shutdown;
use errors::MitmResult;
use spoofsrv::bootstrap::{self, Args};
use spoofsrv::ProxyServer;

#[tokio::main]
async fn main() -> MitmResult<()> {
    let args = Args::parse();
    let service_info = bootstrap::service_info();

    service_bootstrap::initialize_logging(&args.service, &service_info)?;
    if !args.service.no_color {
        print_startup_banner(&service_info);
    }

    let config = bootstrap::load_config(&args)?;

    // Validation mode: print the effective configuration and exit
    if args.service.validate {
        let yaml = serde_yaml::to_string(&config)?;
        println!("{}", yaml);
        info!("Validation completed successfully");
        return Ok(());
    }

    let handle = ProxyServer::start(config).await?;
    cancel_on_shutdown(handle.cancellation_token()).await;

    handle.stop().await;
    info!("spoofsrv shutdown complete");
    Ok(())
}
