//! Binary entry point: configuration from the environment, tracing to
//! stderr, then serve until a shutdown signal arrives.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eip_sim::{EipServer, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    info!(
        tcp_port = config.tcp_port,
        udp_port = config.udp_port,
        tags = config.tag_count,
        product_name = %config.product_name,
        "starting EtherNet/IP simulator"
    );

    let server = match EipServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::from(2);
        }
    };
    let bound = match server.bind().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "bind failed");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = bound.run() => {
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "server terminated");
                    ExitCode::FAILURE
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            ExitCode::SUCCESS
        }
    }
}
