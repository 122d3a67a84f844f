//! Admin HTTP surface over a running bookie

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::bookie::{Bookie, BookieError, BookieStats};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct AppState {
    pub bookie: Arc<Bookie>,
}

impl AppState {
    pub fn new(bookie: Arc<Bookie>) -> Self {
        Self { bookie }
    }
}

#[derive(Debug, Serialize)]
pub struct LastAddConfirmedResponse {
    pub ledger_id: i64,
    pub last_add_confirmed: i64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

/// Maps engine errors onto HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Bookie(#[from] BookieError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Bookie(BookieError::NoLedger(_) | BookieError::NoEntry { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Bookie(BookieError::Rejected(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Bookie(BookieError::NoLedger(_)) => "NO_SUCH_LEDGER",
            ApiError::Bookie(BookieError::NoEntry { .. }) => "NO_SUCH_ENTRY",
            ApiError::Bookie(BookieError::Rejected(_)) => "UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        if status.is_server_error() {
            error!(error = %self, "Admin request failed");
        }

        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ledgers/{ledger_id}/lac", get(last_add_confirmed))
        .route("/ledgers/{ledger_id}/entries/{entry_id}", get(read_entry))
        .with_state(state)
}

/// Serve the admin API until Ctrl+C or SIGTERM, then shut the bookie down
pub async fn run(address: SocketAddr, bookie: Arc<Bookie>) -> Result<(), AnyError> {
    let app = router(AppState::new(bookie.clone()));

    let listener = TcpListener::bind(address).await?;
    info!(%address, bookie_id = %bookie.bookie_id(), "Bookie admin API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bookie.shutdown().await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn stats(State(state): State<AppState>) -> Json<BookieStats> {
    Json(state.bookie.stats())
}

async fn last_add_confirmed(
    State(state): State<AppState>,
    Path(ledger_id): Path<i64>,
) -> Result<Json<LastAddConfirmedResponse>, ApiError> {
    let last_add_confirmed = state.bookie.read_last_add_confirmed(ledger_id)?;
    Ok(Json(LastAddConfirmedResponse {
        ledger_id,
        last_add_confirmed,
    }))
}

async fn read_entry(
    State(state): State<AppState>,
    Path((ledger_id, entry_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let bookie = state.bookie.clone();
    let entry = tokio::task::spawn_blocking(move || bookie.read_entry(ledger_id, entry_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        entry.payload,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
