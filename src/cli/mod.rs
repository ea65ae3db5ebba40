//! CLI argument definitions for `sqled` and `scannerd`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::{
    CliDefaults, DEFAULT_LOG_PATH, DEFAULT_OBSCURED_PASSWORD, DEFAULT_PARSER_HOST,
    DEFAULT_PARSER_PORT, DEFAULT_SERVER_PORT,
};
use crate::lifecycle::ServiceOptions;
use crate::template::DEFAULT_TEMPLATE_PATH;

/// Version string shown by `--version`, with the build's commit and time.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("SQLE_GIT_COMMIT"),
    ", built ",
    env!("SQLE_BUILD_TIMESTAMP"),
    ")"
);

/// Retry budget of a scanner run.
pub const SCANNER_MAX_RETRIES: u32 = 30;

/// Largest number of SQL entries sent in one upload.
pub const SCANNER_BUFFER_SIZE: usize = 1024;

/// SQLE - SQL review server.
///
/// Starts the HTTP API. Flags give the defaults; a file passed with
/// `--config` overrides every value it sets.
#[derive(Parser, Debug)]
#[command(name = "sqled")]
#[command(version, long_version = LONG_VERSION, about = "SQL review server", long_about = None)]
pub struct ServiceCli {
    /// HTTP server port
    #[arg(short = 'p', long, global = true, default_value_t = DEFAULT_SERVER_PORT)]
    pub port: u16,

    /// MySQL user
    #[arg(long = "mysql-user", global = true, default_value = "sqle")]
    pub mysql_user: String,

    /// MySQL password, base64 encoded
    #[arg(long = "mysql-password", global = true, default_value = DEFAULT_OBSCURED_PASSWORD)]
    pub mysql_password: String,

    /// MySQL host
    #[arg(long = "mysql-host", global = true, default_value = "localhost")]
    pub mysql_host: String,

    /// MySQL port
    #[arg(long = "mysql-port", global = true, default_value = "3306")]
    pub mysql_port: String,

    /// MySQL schema
    #[arg(long = "mysql-schema", global = true, default_value = "sqle")]
    pub mysql_schema: String,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pid file path
    #[arg(long = "pidfile", global = true)]
    pub pid_file: Option<PathBuf>,

    /// Debug mode, log more
    #[arg(long, global = true)]
    pub debug: bool,

    /// Create missing tables and seed the default rules at startup
    #[arg(long = "auto-migrate-table", global = true)]
    pub auto_migrate_table: bool,

    /// Database URL used instead of the MySQL settings
    #[arg(long = "database-url", global = true, env = "SQLE_DATABASE_URL", hide = true)]
    pub database_url: Option<String>,

    /// pt-online-schema-change command template
    #[arg(
        long = "pt-template",
        global = true,
        env = "SQLE_PT_TEMPLATE",
        default_value = DEFAULT_TEMPLATE_PATH,
        hide = true
    )]
    pub pt_template: PathBuf,

    #[command(subcommand)]
    pub command: Option<ServiceCommands>,
}

#[derive(Subcommand, Debug)]
pub enum ServiceCommands {
    /// Create a config file from the given flags
    ///
    /// Writes to the path given with --config.
    Load,
}

impl ServiceCli {
    /// Flag values as the lowest-precedence configuration layer.
    pub fn cli_defaults(&self) -> CliDefaults {
        CliDefaults {
            port: self.port,
            auto_migrate: self.auto_migrate_table,
            debug: self.debug,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            mysql_user: self.mysql_user.clone(),
            mysql_password: self.mysql_password.clone(),
            mysql_host: self.mysql_host.clone(),
            mysql_port: self.mysql_port.clone(),
            mysql_schema: self.mysql_schema.clone(),
            parser_host: DEFAULT_PARSER_HOST.to_string(),
            parser_port: DEFAULT_PARSER_PORT.to_string(),
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            pid_file: self.pid_file.clone(),
            template_path: self.pt_template.clone(),
            database_url: self.database_url.clone(),
        }
    }
}

/// SQLE scanner agent.
///
/// Collects SQL and uploads it to an audit plan on a SQLE server.
#[derive(Parser, Debug)]
#[command(name = "scannerd")]
#[command(version, long_version = LONG_VERSION, about = "SQLE scanner agent", long_about = None)]
pub struct ScannerCli {
    /// SQLE server host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub host: String,

    /// SQLE server port
    #[arg(short = 'p', long, global = true, default_value_t = DEFAULT_SERVER_PORT)]
    pub port: u16,

    /// Agent token sent with every request
    #[arg(long, global = true, env = "SQLE_SCANNER_TOKEN", default_value = "")]
    pub token: String,

    /// Audit plan name
    #[arg(short = 'N', long = "name", global = true, default_value = "")]
    pub audit_plan: String,

    /// Request timeout in seconds
    #[arg(
        long,
        global = true,
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: ScannerCommands,
}

#[derive(Subcommand, Debug)]
pub enum ScannerCommands {
    /// Parse SQL text or a directory of .sql files
    Sqltext {
        /// SQL query text
        #[arg(short = 'S', long)]
        sql: Option<String>,

        /// Directory of .sql files
        #[arg(short = 'D', long)]
        dir: Option<PathBuf>,

        /// Trigger an audit immediately after the upload
        #[arg(short = 'A', long, default_value_t = true, action = ArgAction::Set)]
        audit: bool,
    },
}
