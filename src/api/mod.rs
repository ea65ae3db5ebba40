//! HTTP API of the review service.
//!
//! Every response uses the same envelope:
//! ```text
//! {"code": 0, "message": "ok", "data": ...}
//! ```
//! `code` is 0 on success. The scanner agent decodes the same envelope from
//! the audit plan endpoints.

pub mod server;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::parser_client::ParserClient;
use crate::policy::{Rule, RuleTemplate};
use crate::storage::Storage;
use crate::template::{PtOscArgs, PtTemplate};

pub use server::{ApiExit, spawn_api};

pub const CODE_OK: i64 = 0;
pub const CODE_INVALID_REQUEST: i64 = 4000;
pub const CODE_INTERNAL: i64 = 5000;

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Error returned by a handler, rendered as an envelope with a non-zero code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: i64,
    message: String,
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: CODE_INVALID_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: CODE_INTERNAL,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.code,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        tracing::error!("API request failed: {}", e);
        ApiError::internal(e.to_string())
    }
}

/// Database target used when rendering pt-online-schema-change commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTarget {
    pub host: String,
    pub port: String,
    pub user: String,
    pub schema: String,
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub storage: Storage,
    pub template: Arc<PtTemplate>,
    pub db: DbTarget,
    /// `None` when the dialect parser could not be initialized.
    pub parser: Option<ParserClient>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/basic_info", get(basic_info))
        .route("/v1/rules", get(list_rules))
        .route("/v1/rule_templates", get(list_rule_templates))
        .route("/v1/tools/pt_osc", post(render_pt_osc))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub version: String,
    pub parser_address: Option<String>,
}

async fn basic_info(State(state): State<AppState>) -> Json<ApiResponse<BasicInfo>> {
    Json(ApiResponse::ok(BasicInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        parser_address: state.parser.as_ref().map(|p| p.to_string()),
    }))
}

async fn list_rules(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Rule>>>, ApiError> {
    let rules = state.storage.list_rules().await?;
    Ok(Json(ApiResponse::ok(rules)))
}

async fn list_rule_templates(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<RuleTemplate>>>, ApiError> {
    let templates = state.storage.list_templates().await?;
    Ok(Json(ApiResponse::ok(templates)))
}

/// Request body for `POST /v1/tools/pt_osc`.
#[derive(Debug, Deserialize)]
struct PtOscRequest {
    #[serde(default)]
    schema: Option<String>,
    table: String,
    alter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtOscCommand {
    pub command: String,
}

async fn render_pt_osc(
    State(state): State<AppState>,
    Json(request): Json<PtOscRequest>,
) -> Result<Json<ApiResponse<PtOscCommand>>, ApiError> {
    if request.table.trim().is_empty() {
        return Err(ApiError::invalid("table is required"));
    }
    if request.alter.trim().is_empty() {
        return Err(ApiError::invalid("alter is required"));
    }

    let schema = request
        .schema
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.db.schema.clone());
    let command = state.template.render(&PtOscArgs {
        schema,
        table: request.table,
        alter: request.alter,
        host: state.db.host.clone(),
        port: state.db.port.clone(),
        user: state.db.user.clone(),
    });

    Ok(Json(ApiResponse::ok(PtOscCommand { command })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DefaultPolicySet;
    use crate::test_utils::TestEnv;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app(env: &TestEnv, parser: Option<ParserClient>) -> Router {
        let storage = env.open_storage().await;
        storage
            .migrate_if_requested(true, &DefaultPolicySet::default())
            .await
            .unwrap();
        let template_path =
            env.write_template("D={{.Schema}},t={{.Table}} --alter=\"{{.Alter}}\" h={{.Host}}:{{.Port}} u={{.User}}");

        router(AppState {
            storage,
            template: Arc::new(PtTemplate::load(&template_path).unwrap()),
            db: DbTarget {
                host: "db1".to_string(),
                port: "3306".to_string(),
                user: "sqle".to_string(),
                schema: "sqle".to_string(),
            },
            parser,
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_basic_info_reports_parser() {
        let env = TestEnv::new();
        let parser = ParserClient::connect("127.0.0.1", "10001").await.unwrap();

        let (status, body) = send(app(&env, Some(parser)).await, get("/v1/basic_info")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["data"]["parser_address"], "127.0.0.1:10001");
    }

    #[tokio::test]
    async fn test_basic_info_without_parser() {
        let env = TestEnv::new();

        let (_, body) = send(app(&env, None).await, get("/v1/basic_info")).await;

        assert!(body["data"]["parser_address"].is_null());
    }

    #[tokio::test]
    async fn test_lists_seeded_rules_and_templates() {
        let env = TestEnv::new();
        let app = app(&env, None).await;
        let policy = DefaultPolicySet::default();

        let (_, rules) = send(app.clone(), get("/v1/rules")).await;
        assert_eq!(rules["data"].as_array().unwrap().len(), policy.rules.len());

        let (_, templates) = send(app, get("/v1/rule_templates")).await;
        assert_eq!(templates["data"][0]["name"], "default");
    }

    #[tokio::test]
    async fn test_pt_osc_renders_with_db_target() {
        let env = TestEnv::new();

        let (status, body) = send(
            app(&env, None).await,
            post_json(
                "/v1/tools/pt_osc",
                serde_json::json!({"table": "orders", "alter": "ADD INDEX idx_a (a)"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["command"],
            "D=sqle,t=orders --alter=\"ADD INDEX idx_a (a)\" h=db1:3306 u=sqle"
        );
    }

    #[tokio::test]
    async fn test_pt_osc_requires_table() {
        let env = TestEnv::new();

        let (status, body) = send(
            app(&env, None).await,
            post_json(
                "/v1/tools/pt_osc",
                serde_json::json!({"schema": "shop", "table": " ", "alter": "DROP COLUMN a"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], CODE_INVALID_REQUEST);
        assert_eq!(body["message"], "table is required");
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal_error() {
        let env = TestEnv::new();
        // Schema never migrated, so the rules table does not exist
        let storage = env.open_storage().await;
        let template_path = env.write_template("{{.Table}}");
        let app = router(AppState {
            storage,
            template: Arc::new(PtTemplate::load(&template_path).unwrap()),
            db: DbTarget {
                host: "db1".to_string(),
                port: "3306".to_string(),
                user: "sqle".to_string(),
                schema: "sqle".to_string(),
            },
            parser: None,
        });

        let (status, body) = send(app, get("/v1/rules")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], CODE_INTERNAL);
    }
}
