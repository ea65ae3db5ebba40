//! Client for the auxiliary SQL Server dialect parser.
//!
//! The parser runs as a separate process. The service only needs to know
//! where it is; when the address does not resolve the service keeps running
//! and dialects that need the parser are unavailable.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::{Error, Result};

/// Resolved address of the dialect parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserClient {
    addr: SocketAddr,
}

impl ParserClient {
    /// Resolve `host:port` into a client handle.
    pub async fn connect(host: &str, port: &str) -> Result<Self> {
        let host = host.trim();
        let port = port.trim();
        if host.is_empty() || port.is_empty() {
            return Err(Error::AuxiliaryServiceInit(format!(
                "parser address '{}:{}' is incomplete",
                host, port
            )));
        }

        let port: u16 = port.parse().map_err(|_| {
            Error::AuxiliaryServiceInit(format!("invalid parser port '{}'", port))
        })?;

        let addr = lookup_host((host, port))
            .await
            .map_err(|e| {
                Error::AuxiliaryServiceInit(format!("resolve parser host '{}': {}", host, e))
            })?
            .next()
            .ok_or_else(|| {
                Error::AuxiliaryServiceInit(format!("parser host '{}' has no address", host))
            })?;

        Ok(Self { addr })
    }

    #[cfg(test)]
    fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for ParserClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
