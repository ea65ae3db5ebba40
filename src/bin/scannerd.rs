//! scannerd - SQLE scanner agent.

use std::process;
use std::time::Duration;

use clap::Parser;
use sqle::cli::{SCANNER_BUFFER_SIZE, SCANNER_MAX_RETRIES, ScannerCli, ScannerCommands};
use sqle::scanner::{
    self, ClientError, RemoteClient, ScanError, ScanReport, Scanner, ScannerKind, ScannerParams,
    SqlTextParams, SupervisorError,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AgentError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("failed to create runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() {
    let cli = ScannerCli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: ScannerCli) -> Result<(), AgentError> {
    let mut client = RemoteClient::new(Duration::from_secs(cli.timeout), &cli.host, cli.port)?;
    if !cli.token.is_empty() {
        client = client.with_token(cli.token);
    }

    let params = match cli.command {
        ScannerCommands::Sqltext { sql, dir, audit } => {
            ScannerParams::SqlText(SqlTextParams::new(sql, dir, cli.audit_plan, audit)?)
        }
    };
    let scanner = ScannerKind::new(params, client)?;

    let report = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(supervise(scanner))?;

    info!(
        statements = report.statements,
        uploaded = report.uploaded,
        chunks = report.chunks,
        triggered = report.triggered,
        "Done"
    );
    Ok(())
}

async fn supervise(scanner: ScannerKind) -> Result<ScanReport, SupervisorError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let span = info_span!("scanner", scanner = scanner.name());
    scanner::start(cancel, scanner, SCANNER_MAX_RETRIES, SCANNER_BUFFER_SIZE)
        .instrument(span)
        .await
}
