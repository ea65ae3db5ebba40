//! SQLE - bootstrap and supervision layer for a SQL review service.
//!
//! This library backs two binaries:
//! - `sqled`: resolves configuration, prepares storage, and serves the review API
//!   until a termination signal arrives.
//! - `scannerd`: builds a scan unit from CLI parameters and drives it against a
//!   remote SQLE server under a retrying supervisor.

pub mod api;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod parser_client;
pub mod policy;
pub mod scanner;
pub mod storage;
pub mod template;

use std::path::PathBuf;


/// Library-level error type for service startup and operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("load config path: {} failed: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("decode mysql password to string error: {0}")]
    CredentialDecode(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("load template {}: {reason}", .path.display())]
    TemplateLoad { path: PathBuf, reason: String },

    #[error("auxiliary parser service: {0}")]
    AuxiliaryServiceInit(String),

    #[error("pid file {}: {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("init log sink at {}: {reason}", .path.display())]
    LoggingInit { path: PathBuf, reason: String },

    #[error("register signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for SQLE operations.
pub type Result<T> = std::result::Result<T, Error>;
