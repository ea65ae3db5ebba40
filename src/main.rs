//! sqled - SQL review server.

use std::process;

use clap::Parser;
use sqle::cli::{ServiceCli, ServiceCommands};
use sqle::config;
use sqle::lifecycle::{LifecycleManager, ShutdownCause};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = ServiceCli::parse();

    let result = match cli.command {
        Some(ServiceCommands::Load) => run_load(&cli),
        None => run_service(&cli),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Write a config file populated from the flags.
fn run_load(cli: &ServiceCli) -> Result<(), sqle::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let path = cli.config.as_deref().ok_or_else(|| {
        sqle::Error::InvalidInput("load requires --config <path>".to_string())
    })?;
    info!(path = %path.display(), "Creating config file from the given flags");
    config::write_config_file(path, &cli.cli_defaults())?;
    info!(path = %path.display(), "Config file written");
    Ok(())
}

/// Resolve configuration and serve until a termination signal.
fn run_service(cli: &ServiceCli) -> Result<(), sqle::Error> {
    let resolved = config::resolve(&cli.cli_defaults(), cli.config.as_deref())?;
    let manager = LifecycleManager::new(resolved, cli.service_options());

    let cause = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(manager.run())?;

    if cause == ShutdownCause::ApiExited {
        eprintln!("Warning: API server stopped unexpectedly, see the service log");
    }
    Ok(())
}
