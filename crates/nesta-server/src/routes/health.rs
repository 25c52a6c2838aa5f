use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::state::AppState;
use nesta_core::traits::*;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: 200 once the database answers within [`READY_TIMEOUT`], 503 otherwise.
pub async fn readiness_check<C, L, G>(
    State(state): State<AppState<C, L, G>>,
) -> (StatusCode, Json<Value>)
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    match tokio::time::timeout(READY_TIMEOUT, state.credential_store.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "db_unavailable"})),
            )
        }
        Err(_) => {
            tracing::warn!("readiness check timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "db_unavailable"})),
            )
        }
    }
}
