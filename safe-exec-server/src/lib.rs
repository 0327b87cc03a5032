use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use safe_exec::{ExecutionOutcome, ExecutionService, ServiceConfig};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("{0}")]
    Busy(String),
    #[error("Endpoint not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<safe_exec::Error> for ServerError {
    fn from(e: safe_exec::Error) -> Self {
        match e {
            safe_exec::Error::Validation(rejection) => ServerError::BadRequest(rejection.to_string()),
            safe_exec::Error::Busy(limit) => ServerError::Busy(format!(
                "Too many concurrent executions (limit {}), try again later",
                limit
            )),
            other => ServerError::ServerError(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::ExecutionFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ServerError::Busy(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            ServerError::ServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecuteRequest {
    /// Kept as a raw value so a non-string script is reported as such.
    /// `None` only when the key is absent; `null` is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present")]
    pub script: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result: Value,
    pub stdout: String,
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<ExecutionService>,
}

pub fn create_app(config: &ServiceConfig) -> Result<Router, ServerError> {
    let service = ExecutionService::new(config)?;
    Ok(app(service))
}

/// Router over an already built service
pub fn app(service: ExecutionService) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    Router::new()
        .route("/", get(root).fallback(method_not_allowed))
        .route("/health", get(health_check).fallback(method_not_allowed))
        .route("/execute", post(execute).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;
    serve(listener, app).await
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Starting script execution server on {}", addr);
    }

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "Safe Python Script Execution Service",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.service.backend_kind().to_string(),
        "endpoints": {
            "/health": "GET - Health check",
            "/execute": "POST - Execute Python script"
        },
        "usage": {
            "health_check": "GET /health",
            "execute_script": "POST /execute with JSON body: {\"script\": \"def main():\\n    return {\\\"result\\\": \\\"success\\\"}\"}"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "python-executor" }))
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ServerError> {
    let Json(payload) = payload.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ServerError::BadRequest("Content-Type must be application/json".to_string())
        }
        other => ServerError::BadRequest(format!("Invalid JSON body: {}", other.body_text())),
    })?;

    let script = payload
        .script
        .ok_or_else(|| ServerError::BadRequest("Request must contain 'script' field".to_string()))?;

    match state.service.execute_value(&script).await? {
        ExecutionOutcome::Success { result, stdout } => Ok(Json(ExecuteResponse { result, stdout })),
        outcome => {
            error!("Execution error ({}): {}", outcome.kind(), outcome);
            Err(ServerError::ExecutionFailed(outcome.to_string()))
        }
    }
}

async fn not_found() -> ServerError {
    ServerError::NotFound
}

async fn method_not_allowed() -> ServerError {
    ServerError::MethodNotAllowed
}
