use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use tillsync_core::{DbStatus, PassOutcome};
use tillsync_telemetry::{LogQuery, LogRecord};

use crate::server::AppState;
use crate::service::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let unavailable = match &e {
            ServiceError::LocalUnavailable => true,
            ServiceError::Store(store) => store.is_connectivity(),
            ServiceError::Task(_) => false,
        };
        if unavailable {
            Self::Unavailable(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    pub message: &'static str,
    pub connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct BalanceParams {
    pub mobile_number: Option<String>,
}

pub async fn global_db_failed(State(state): State<AppState>) -> Json<Value> {
    state.service.mark_global_failed();
    Json(json!({ "message": "Global database connection marked as failed." }))
}

pub async fn reconnect_global_db(State(state): State<AppState>) -> ApiResult<Json<ReconnectResponse>> {
    info!("chain store reconnect requested");
    let connected = state.service.reconnect_global().await?;
    let message = if connected {
        "Global database reconnected successfully."
    } else {
        "Failed to reconnect global database."
    };
    Ok(Json(ReconnectResponse { message, connected }))
}

pub async fn db_status(State(state): State<AppState>) -> Json<DbStatus> {
    Json(state.service.status())
}

pub async fn sync_now(State(state): State<AppState>) -> ApiResult<Json<PassOutcome>> {
    Ok(Json(state.service.sync_now().await?))
}

pub async fn points_balance(
    State(state): State<AppState>,
    Query(params): Query<BalanceParams>,
) -> ApiResult<Json<Value>> {
    let mobile = params
        .mobile_number
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Mobile number is required.".into()))?;
    let balance = state.service.points_balance(&mobile).await?;
    Ok(Json(json!({ "balance_after": balance })))
}

pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    let Some(sink) = state.logs.clone() else {
        return Ok(Json(Vec::new()));
    };
    let records = tokio::task::spawn_blocking(move || sink.query(&query))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(format!("log query failed: {e}")))?;
    Ok(Json(records))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.service.status();
    let code = if status.local_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if status.local_connected { "healthy" } else { "degraded" },
        "localConnected": status.local_connected,
        "globalConnected": status.global_connected,
    });
    (code, Json(body))
}
