//! YAML schema for the service configuration document.
//!
//! The same structs are used to render a document (`sqled load`) and to read one
//! back during resolution, so the field names below are the only place the
//! document layout is spelled out.
//!
//! # Layout
//!
//! ```yaml
//! server:
//!   sqle_config:
//!     server_port: 10000
//!     auto_migrate_table: true
//!     debug_log: false
//!     log_path: ./logs
//!   db_config:
//!     mysql_cnf:
//!       mysql_host: localhost
//!       mysql_port: '3306'
//!       mysql_user: sqle
//!       mysql_password: c3FsZQ==
//!       mysql_schema: sqle
//!     sql_server_cnf:
//!       sql_server_host: 127.0.0.1
//!       sql_server_port: '10001'
//! ```
//!
//! Every leaf is optional. A missing, null, or blank leaf means "not set by the
//! file" and leaves the command-line value in place.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Root of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sqle_config: SqleSection,
    #[serde(default, deserialize_with = "null_as_default")]
    pub db_config: DbSection,
}

/// Service settings (`server.sqle_config`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqleSection {
    #[serde(default, deserialize_with = "opt_port")]
    pub server_port: Option<u16>,
    #[serde(default)]
    pub auto_migrate_table: Option<bool>,
    #[serde(default)]
    pub debug_log: Option<bool>,
    #[serde(default, deserialize_with = "opt_text")]
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub mysql_cnf: MysqlSection,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sql_server_cnf: SqlServerSection,
}

/// MySQL connection settings (`server.db_config.mysql_cnf`).
///
/// `mysql_password` holds the obscured (base64) form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlSection {
    #[serde(default, deserialize_with = "opt_text")]
    pub mysql_host: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub mysql_port: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub mysql_user: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub mysql_password: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub mysql_schema: Option<String>,
}

/// Address of the auxiliary SQL Server dialect parser (`server.db_config.sql_server_cnf`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlServerSection {
    #[serde(default, deserialize_with = "opt_text")]
    pub sql_server_host: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub sql_server_port: Option<String>,
}

impl ConfigDocument {
    /// Parse a document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid document that sets nothing.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Render the document as YAML text.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Scalars accepted where the document expects text (`mysql_port: 3306` is common).
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value
        .map(|scalar| match scalar {
            Scalar::Text(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        })
        .filter(|s| !s.trim().is_empty()))
}

fn opt_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match opt_text(deserializer)? {
        None => Ok(None),
        Some(text) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid server_port {:?}", text))),
    }
}
