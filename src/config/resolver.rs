//! Precedence resolution between command-line defaults and the config file.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Fields set in the config file (`--config`)
//! 2. Command-line flags, including their built-in defaults
//!
//! The merge is field by field: a field the file leaves unset keeps the CLI
//! value. The database password travels in obscured (base64) form through both
//! sources and is decoded exactly once, when the merged values are resolved.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::config::schema::{
    ConfigDocument, DbSection, MysqlSection, ServerSection, SqlServerSection, SqleSection,
};
use crate::{Error, Result};

/// Default HTTP port for the review API.
pub const DEFAULT_SERVER_PORT: u16 = 10000;

/// Default directory for the service log sink.
pub const DEFAULT_LOG_PATH: &str = "./logs";

/// Obscured form of the default database password (`sqle`).
pub const DEFAULT_OBSCURED_PASSWORD: &str = "c3FsZQ==";

/// Default address of the auxiliary SQL Server dialect parser.
pub const DEFAULT_PARSER_HOST: &str = "127.0.0.1";
pub const DEFAULT_PARSER_PORT: &str = "10001";

/// Values supplied on the command line (or their flag defaults).
///
/// `mysql_password` is the obscured form exactly as the operator typed it.
#[derive(Clone, PartialEq, Eq)]
pub struct CliDefaults {
    pub port: u16,
    pub auto_migrate: bool,
    pub debug: bool,
    pub log_path: PathBuf,
    pub mysql_user: String,
    pub mysql_password: String,
    pub mysql_host: String,
    pub mysql_port: String,
    pub mysql_schema: String,
    pub parser_host: String,
    pub parser_port: String,
}

impl Default for CliDefaults {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            auto_migrate: false,
            debug: false,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            mysql_user: "sqle".to_string(),
            mysql_password: DEFAULT_OBSCURED_PASSWORD.to_string(),
            mysql_host: "localhost".to_string(),
            mysql_port: "3306".to_string(),
            mysql_schema: "sqle".to_string(),
            parser_host: DEFAULT_PARSER_HOST.to_string(),
            parser_port: DEFAULT_PARSER_PORT.to_string(),
        }
    }
}

impl fmt::Debug for CliDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliDefaults")
            .field("port", &self.port)
            .field("auto_migrate", &self.auto_migrate)
            .field("debug", &self.debug)
            .field("log_path", &self.log_path)
            .field("mysql_user", &self.mysql_user)
            .field("mysql_password", &"<redacted>")
            .field("mysql_host", &self.mysql_host)
            .field("mysql_port", &self.mysql_port)
            .field("mysql_schema", &self.mysql_schema)
            .field("parser_host", &self.parser_host)
            .field("parser_port", &self.parser_port)
            .finish()
    }
}

impl CliDefaults {
    /// Overlay every field the document sets.
    fn apply(&mut self, document: &ConfigDocument) {
        let sqle = &document.server.sqle_config;
        let mysql = &document.server.db_config.mysql_cnf;
        let parser = &document.server.db_config.sql_server_cnf;

        if let Some(port) = sqle.server_port {
            self.port = port;
        }
        if let Some(auto_migrate) = sqle.auto_migrate_table {
            self.auto_migrate = auto_migrate;
        }
        if let Some(debug) = sqle.debug_log {
            self.debug = debug;
        }
        if let Some(ref log_path) = sqle.log_path {
            self.log_path = PathBuf::from(log_path);
        }

        overlay(&mut self.mysql_host, &mysql.mysql_host);
        overlay(&mut self.mysql_port, &mysql.mysql_port);
        overlay(&mut self.mysql_user, &mysql.mysql_user);
        overlay(&mut self.mysql_password, &mysql.mysql_password);
        overlay(&mut self.mysql_schema, &mysql.mysql_schema);
        overlay(&mut self.parser_host, &parser.sql_server_host);
        overlay(&mut self.parser_port, &parser.sql_server_port);
    }

    fn into_resolved(self) -> Result<ResolvedConfig> {
        let password = decode_credential(&self.mysql_password)?;

        Ok(ResolvedConfig {
            server: ServerConfig {
                port: self.port,
                auto_migrate: self.auto_migrate,
                debug: self.debug,
                log_path: self.log_path,
            },
            db: DbConfig {
                user: self.mysql_user,
                password,
                host: self.mysql_host,
                port: self.mysql_port,
                schema: self.mysql_schema,
            },
            remote_parser: RemoteParserConfig {
                host: self.parser_host,
                port: self.parser_port,
            },
        })
    }

    /// Build the document `sqled load` writes for these values.
    pub fn to_document(&self) -> ConfigDocument {
        ConfigDocument {
            server: ServerSection {
                sqle_config: SqleSection {
                    server_port: Some(self.port),
                    auto_migrate_table: Some(self.auto_migrate),
                    debug_log: Some(self.debug),
                    log_path: Some(self.log_path.display().to_string()),
                },
                db_config: DbSection {
                    mysql_cnf: MysqlSection {
                        mysql_host: Some(self.mysql_host.clone()),
                        mysql_port: Some(self.mysql_port.clone()),
                        mysql_user: Some(self.mysql_user.clone()),
                        mysql_password: Some(self.mysql_password.clone()),
                        mysql_schema: Some(self.mysql_schema.clone()),
                    },
                    sql_server_cnf: SqlServerSection {
                        sql_server_host: Some(self.parser_host.clone()),
                        sql_server_port: Some(self.parser_port.clone()),
                    },
                },
            },
        }
    }
}

fn overlay(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

/// Final configuration for one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub remote_parser: RemoteParserConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub auto_migrate: bool,
    pub debug: bool,
    pub log_path: PathBuf,
}

/// Database connection settings. `password` is always the decoded plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub schema: String,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .finish()
    }
}

impl DbConfig {
    /// MySQL connection URL with percent-encoded credentials.
    pub fn connection_url(&self) -> Result<String> {
        let address = format!("mysql://{}:{}/{}", self.host, self.port, self.schema);
        let mut url = Url::parse(&address)
            .map_err(|e| Error::InvalidInput(format!("invalid database address '{}': {}", address, e)))?;
        url.set_username(&self.user)
            .map_err(|_| Error::InvalidInput("database user cannot be set on URL".to_string()))?;
        url.set_password(Some(&self.password))
            .map_err(|_| Error::InvalidInput("database password cannot be set on URL".to_string()))?;
        Ok(url.to_string())
    }
}

/// Address of the auxiliary dialect-parsing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParserConfig {
    pub host: String,
    pub port: String,
}

/// Decode an obscured credential.
pub fn decode_credential(obscured: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(obscured.trim())
        .map_err(|e| Error::CredentialDecode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::CredentialDecode(e.to_string()))
}

/// Obscure a plaintext credential (inverse of [`decode_credential`]).
pub fn obscure_credential(plain: &str) -> String {
    STANDARD.encode(plain)
}

/// Read and parse a configuration document.
pub fn load_document(path: &Path) -> Result<ConfigDocument> {
    let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigDocument::from_yaml(&text).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge CLI defaults with the optional config file and decode credentials.
///
/// An empty `config_path` behaves like no path at all.
pub fn resolve(defaults: &CliDefaults, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let mut merged = defaults.clone();

    if let Some(path) = config_path.filter(|p| !p.as_os_str().is_empty()) {
        let document = load_document(path)?;
        merged.apply(&document);
    }

    merged.into_resolved()
}

/// Render the configuration document for the given flag values.
///
/// The password is written in obscured form; it must decode, so a typo is caught
/// here rather than on the next service start.
pub fn render_config(defaults: &CliDefaults) -> Result<String> {
    decode_credential(&defaults.mysql_password)?;
    Ok(defaults.to_document().to_yaml()?)
}

/// Render and write the configuration document to `path`.
pub fn write_config_file(path: &Path, defaults: &CliDefaults) -> Result<()> {
    let rendered = render_config(defaults)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("sqle.yaml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_no_config_path_uses_defaults_with_decoded_password() {
        let resolved = resolve(&CliDefaults::default(), None).unwrap();
        assert_eq!(resolved.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(resolved.db.password, "sqle");
        assert_eq!(resolved.db.host, "localhost");
        assert_eq!(resolved.remote_parser.port, DEFAULT_PARSER_PORT);
    }

    #[test]
    fn test_empty_config_path_behaves_like_none() {
        let resolved = resolve(&CliDefaults::default(), Some(Path::new(""))).unwrap();
        assert_eq!(resolved, resolve(&CliDefaults::default(), None).unwrap());
    }

    #[test]
    fn test_partial_file_overrides_only_its_fields() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "server:\n sqle_config:\n  server_port: 12000\n db_config:\n  mysql_cnf:\n   mysql_host: db.example\n",
        );
        let defaults = CliDefaults {
            mysql_user: "operator".to_string(),
            debug: true,
            ..CliDefaults::default()
        };

        let resolved = resolve(&defaults, Some(&path)).unwrap();

        assert_eq!(resolved.server.port, 12000);
        assert_eq!(resolved.db.host, "db.example");
        // Not in the file: CLI values survive
        assert_eq!(resolved.db.user, "operator");
        assert!(resolved.server.debug);
        assert_eq!(resolved.db.port, "3306");
        assert_eq!(resolved.db.password, "sqle");
        assert_eq!(resolved.remote_parser.host, DEFAULT_PARSER_HOST);
        assert_eq!(resolved.server.log_path, PathBuf::from(DEFAULT_LOG_PATH));
    }

    #[test]
    fn test_file_can_turn_flags_off() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "server:\n sqle_config:\n  auto_migrate_table: false\n  debug_log: false\n",
        );
        let defaults = CliDefaults {
            auto_migrate: true,
            debug: true,
            ..CliDefaults::default()
        };

        let resolved = resolve(&defaults, Some(&path)).unwrap();
        assert!(!resolved.server.auto_migrate);
        assert!(!resolved.server.debug);
    }

    #[test]
    fn test_file_password_decoded_once() {
        let dir = TempDir::new().unwrap();
        // "WVdKag==" decodes to "YWJj", which itself would decode to "abc"
        let path = write(
            &dir,
            "server:\n db_config:\n  mysql_cnf:\n   mysql_password: 'WVdKag=='\n",
        );

        let resolved = resolve(&CliDefaults::default(), Some(&path)).unwrap();
        assert_eq!(resolved.db.password, "YWJj");
    }

    #[test]
    fn test_cli_password_decoded_once() {
        let defaults = CliDefaults {
            mysql_password: obscure_credential("YWJj"),
            ..CliDefaults::default()
        };
        let resolved = resolve(&defaults, None).unwrap();
        assert_eq!(resolved.db.password, "YWJj");
    }

    #[test]
    fn test_invalid_obscured_password_fails() {
        let defaults = CliDefaults {
            mysql_password: "not base64!".to_string(),
            ..CliDefaults::default()
        };
        let err = resolve(&defaults, None).unwrap_err();
        assert!(matches!(err, Error::CredentialDecode(_)));
    }

    #[test]
    fn test_non_utf8_password_fails() {
        // "sqle" is valid base64 alphabet but decodes to invalid UTF-8
        assert!(matches!(
            decode_credential("sqle"),
            Err(Error::CredentialDecode(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve(
            &CliDefaults::default(),
            Some(&dir.path().join("missing.yaml")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "server: [oops\n");
        let err = resolve(&CliDefaults::default(), Some(&path)).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_rendered_document_resolves_to_same_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("sqle.yaml");
        let defaults = CliDefaults {
            port: 10100,
            auto_migrate: true,
            mysql_password: obscure_credential("p@ss:word"),
            mysql_host: "10.1.1.1".to_string(),
            ..CliDefaults::default()
        };

        write_config_file(&path, &defaults).unwrap();

        // Resolving against different CLI values must yield the file's values
        let resolved = resolve(&CliDefaults::default(), Some(&path)).unwrap();
        assert_eq!(resolved.server.port, 10100);
        assert!(resolved.server.auto_migrate);
        assert_eq!(resolved.db.host, "10.1.1.1");
        assert_eq!(resolved.db.password, "p@ss:word");
    }

    #[test]
    fn test_render_rejects_undecodable_password() {
        let defaults = CliDefaults {
            mysql_password: "%%%".to_string(),
            ..CliDefaults::default()
        };
        assert!(matches!(
            render_config(&defaults),
            Err(Error::CredentialDecode(_))
        ));
    }

    #[test]
    fn test_connection_url_encodes_credentials() {
        let db = DbConfig {
            user: "sqle".to_string(),
            password: "p@ss/word".to_string(),
            host: "localhost".to_string(),
            port: "3306".to_string(),
            schema: "sqle".to_string(),
        };
        let url = db.connection_url().unwrap();
        assert!(url.starts_with("mysql://sqle:"));
        assert!(url.ends_with("@localhost:3306/sqle"));
        assert!(!url.contains("p@ss/word"));
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let defaults = CliDefaults {
            mysql_password: obscure_credential("hunter2"),
            ..CliDefaults::default()
        };
        let resolved = resolve(&defaults, None).unwrap();
        let debug = format!("{:?}", resolved);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
        assert!(!format!("{:?}", defaults).contains(&defaults.mysql_password));
    }
}
