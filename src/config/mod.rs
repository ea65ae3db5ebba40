//! Configuration for the `sqled` service.
//!
//! Values come from two places:
//! - command-line flags (each with a built-in default)
//! - an optional YAML document passed with `--config`
//!
//! ## Precedence
//!
//! A field set in the document wins over the flag; fields the document leaves
//! unset keep the flag value. See [`resolver`] for the merge and [`schema`] for
//! the document layout shared by `sqled load` and the resolver.
//!
//! ## Credentials
//!
//! The database password is supplied obscured (standard base64) everywhere it
//! enters the process and is decoded once during resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CliDefaults, DEFAULT_LOG_PATH, DEFAULT_OBSCURED_PASSWORD, DEFAULT_PARSER_HOST,
    DEFAULT_PARSER_PORT, DEFAULT_SERVER_PORT, DbConfig, RemoteParserConfig, ResolvedConfig,
    ServerConfig, decode_credential, load_document, obscure_credential, render_config, resolve,
    write_config_file,
};
pub use schema::ConfigDocument;
