//! Dashboard: Axum REST API over the agent's state.
//!
//! Everything is read from SQLite per request; the only in-process state
//! is the agent runner (for its lock) and the exogenous refresh gate.
//! When the built dashboard directory exists it is served at `/`.

pub mod routes;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::engine::AgentRunner;
use crate::exogenous::{ExogenousPipeline, RefreshRejection};
use crate::market::MarketDataSource;
use crate::storage::{Database, DbError};
use crate::types::AgentError;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub db: Database,
    pub agent: Arc<AgentRunner>,
    pub exogenous: Arc<ExogenousPipeline>,
    pub market: Arc<dyn MarketDataSource>,
    pub config: AppConfig,
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    TooManyRequests {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        match self {
            ApiError::TooManyRequests {
                retry_after_secs: Some(secs),
                ..
            } => (status, [(header::RETRY_AFTER, secs.to_string())], body).into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(agent) = e.downcast_ref::<AgentError>() {
            match agent {
                AgentError::InvalidInput(_)
                | AgentError::InvalidSuggestion(_)
                | AgentError::InsufficientCash { .. }
                | AgentError::NoHoldings(_) => return ApiError::BadRequest(agent.to_string()),
                _ => {}
            }
        }
        if let Some(DbError::NotFound(what)) = e.downcast_ref::<DbError>() {
            return ApiError::NotFound(format!("Not found: {what}"));
        }
        ApiError::Internal(e)
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => ApiError::NotFound(format!("Not found: {what}")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<RefreshRejection> for ApiError {
    fn from(r: RefreshRejection) -> Self {
        let retry_after_secs = match &r {
            RefreshRejection::Busy => None,
            RefreshRejection::CoolingDown { retry_after_secs } => Some(*retry_after_secs),
        };
        ApiError::TooManyRequests {
            message: r.to_string(),
            retry_after_secs,
        }
    }
}

/// `Json` extractor whose rejections render as `ApiError::BadRequest`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

// ---------------------------------------------------------------------------
// Router & server
// ---------------------------------------------------------------------------

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let static_dir = state
        .config
        .dashboard
        .static_dir
        .clone()
        .filter(|dir| Path::new(dir).is_dir());

    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/api/dashboard", get(routes::get_dashboard))
        .route("/api/agent/run-once", post(routes::run_agent_once))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/decisions", get(routes::get_decisions))
        .route(
            "/api/manual-trades",
            get(routes::get_manual_trades).post(routes::post_manual_trade),
        )
        .route("/api/exogenous/items", get(routes::get_exogenous_items))
        .route("/api/exogenous/narratives", get(routes::get_narratives))
        .route("/api/exogenous/modifiers", get(routes::get_modifiers))
        .route("/api/exogenous/refresh", post(routes::refresh_exogenous))
        .route("/api/performance/monthly", get(routes::get_monthly_performance))
        .route("/api/backtests", post(routes::post_backtest))
        .route("/api/backtests/:id", get(routes::get_backtest))
        .layer(cors)
        .with_state(state);

    match static_dir {
        Some(dir) => {
            info!(dir = %dir, "Serving dashboard assets");
            api.fallback_service(ServeDir::new(dir))
        }
        None => api,
    }
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard address {addr}"))?;
    info!(%addr, "Dashboard listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Dashboard server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_error_status_mapping() {
        let e: ApiError = anyhow::Error::from(AgentError::InvalidInput("x".into())).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e: ApiError = anyhow::Error::from(DbError::NotFound("run 1".into())).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        let e: ApiError = anyhow::anyhow!("boom").into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let e: ApiError = RefreshRejection::Busy.into();
        assert_eq!(e.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_cooldown_response_sets_retry_after() {
        let resp = ApiError::from(RefreshRejection::CoolingDown {
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("42s"));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let state = routes::tests::test_state().await;
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
