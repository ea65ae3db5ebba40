//! HTTP client for the SQLE audit plan endpoints.
//!
//! Every request carries the agent token in the `Authorization` header and the
//! configured timeout. Failures are classified for the supervisor: anything
//! that never got a response is transient, anything the server answered with
//! an error is permanent.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::api::{ApiResponse, CODE_OK};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("invalid request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("{url} rejected the request (code {code}): {message}")]
    Application {
        url: String,
        code: i64,
        message: String,
    },

    #[error("decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Timeout { .. } | ClientError::Transport { .. }
        )
    }

    fn from_reqwest(url: &Url, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            ClientError::Timeout { url }
        } else if e.is_connect() {
            ClientError::Connect { url, source: e }
        } else if e.is_builder() || (e.is_request() && !has_io_source(&e)) {
            ClientError::Request { url, source: e }
        } else {
            ClientError::Transport { url, source: e }
        }
    }
}

/// Whether an I/O error is somewhere in the cause chain of `e`.
fn has_io_source(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// One aggregated SQL entry of an audit plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPlanSql {
    #[serde(rename = "audit_plan_sql_fingerprint")]
    pub fingerprint: String,
    #[serde(rename = "audit_plan_sql_counter")]
    pub counter: String,
    #[serde(rename = "audit_plan_sql_last_receive_text")]
    pub last_receive_text: String,
    #[serde(rename = "audit_plan_sql_last_receive_timestamp")]
    pub last_receive_timestamp: String,
}

#[derive(Debug, Serialize)]
struct AuditPlanSqlRequest<'a> {
    audit_plan_sql_list: &'a [AuditPlanSql],
}

/// Token-authenticated client for one SQLE server.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl RemoteClient {
    pub fn new(timeout: Duration, host: &str, port: u16) -> Result<Self, ClientError> {
        let address = format!("http://{}:{}/", host, port);
        let base_url =
            Url::parse(&address).map_err(|e| ClientError::InvalidAddress(format!("{}: {}", address, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Replace the SQL list of `audit_plan` with `sqls`.
    pub async fn upload_full(
        &self,
        audit_plan: &str,
        sqls: &[AuditPlanSql],
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["v1", "audit_plans", audit_plan, "sqls", "full"])?;
        let body = AuditPlanSqlRequest {
            audit_plan_sql_list: sqls,
        };
        self.post(url, &body, cancel).await
    }

    /// Append `sqls` to the SQL list of `audit_plan`.
    pub async fn upload_partial(
        &self,
        audit_plan: &str,
        sqls: &[AuditPlanSql],
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["v1", "audit_plans", audit_plan, "sqls", "partial"])?;
        let body = AuditPlanSqlRequest {
            audit_plan_sql_list: sqls,
        };
        self.post(url, &body, cancel).await
    }

    /// Ask the server to audit `audit_plan` now.
    pub async fn trigger_audit(
        &self,
        audit_plan: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["v1", "audit_plans", audit_plan, "trigger"])?;
        self.post(url, &serde_json::json!({}), cancel).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidAddress(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B: Serialize>(
        &self,
        url: Url,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = self.send(url, body) => result,
        }
    }

    async fn send<B: Serialize>(&self, url: Url, body: &B) -> Result<(), ClientError> {
        debug!(%url, "POST");
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(ref token) = self.token {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, e))?;

        if !status.is_success() {
            let mut body = text;
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiResponse<serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| ClientError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if envelope.code != CODE_OK {
            return Err(ClientError::Application {
                url: url.to_string(),
                code: envelope.code,
                message: envelope.message,
            });
        }

        Ok(())
    }
}
