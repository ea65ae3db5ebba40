//! Scan units run by the `scannerd` agent.
//!
//! A scanner collects SQL from somewhere and reports it to an audit plan on the
//! SQLE server through a [`RemoteClient`]. The [`supervisor`] drives a scanner
//! attempt by attempt and decides whether a failure is worth retrying, based on
//! how the scanner classified it in [`ScanError`].
//!
//! Concrete scanners are listed in [`ScannerKind`] and picked by the
//! [`ScannerParams`] variant given at construction.

pub mod backoff;
pub mod client;
pub mod sql;
pub mod sqltext;
pub mod supervisor;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use backoff::BackoffPolicy;
pub use client::{AuditPlanSql, ClientError, RemoteClient};
pub use sqltext::{SqlSource, SqlTextParams, SqlTextScanner};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError, SupervisorState, start};

/// Per-attempt context handed to [`Scanner::scan`].
#[derive(Debug, Clone)]
pub struct ScanContext {
    /// Cancelled when the run is aborted. Scanners race their network calls
    /// against it.
    pub cancel: CancellationToken,
    /// Upper bound on items sent in one upload.
    pub buffer_size: usize,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Summary of a successful scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Statements read from the source.
    pub statements: usize,
    /// Distinct fingerprints sent to the server.
    pub uploaded: usize,
    /// Upload requests made over the whole run.
    pub chunks: usize,
    /// Whether an audit was triggered.
    pub triggered: bool,
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// Worth retrying (network trouble, timeouts).
    #[error("{0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("{0}")]
    Permanent(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("invalid scanner parameters: {0}")]
    InvalidParams(String),
}

impl ScanError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::Transient(_))
    }
}

impl From<ClientError> for ScanError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Cancelled => ScanError::Cancelled,
            e if e.is_transient() => ScanError::Transient(e.to_string()),
            e => ScanError::Permanent(e.to_string()),
        }
    }
}

/// A unit of scanning work the supervisor can retry.
///
/// `scan` runs one attempt. State kept on `self` survives into the next
/// attempt, so a scanner can resume where a failed attempt stopped.
#[allow(async_fn_in_trait)]
pub trait Scanner {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn scan(&mut self, ctx: &ScanContext) -> Result<ScanReport, ScanError>;
}

/// Parameters selecting and configuring a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerParams {
    SqlText(SqlTextParams),
}

/// The available scanners.
#[derive(Debug)]
pub enum ScannerKind {
    SqlText(SqlTextScanner),
}

impl ScannerKind {
    /// Build the scanner selected by `params`.
    pub fn new(params: ScannerParams, client: RemoteClient) -> Result<Self, ScanError> {
        match params {
            ScannerParams::SqlText(params) => {
                Ok(ScannerKind::SqlText(SqlTextScanner::new(params, client)?))
            }
        }
    }
}

impl Scanner for ScannerKind {
    fn name(&self) -> &'static str {
        match self {
            ScannerKind::SqlText(scanner) => scanner.name(),
        }
    }

    async fn scan(&mut self, ctx: &ScanContext) -> Result<ScanReport, ScanError> {
        match self {
            ScannerKind::SqlText(scanner) => scanner.scan(ctx).await,
        }
    }
}
