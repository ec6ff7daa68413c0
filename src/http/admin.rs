//! Operator view of payouts awaiting manual reconciliation. Only mounted when
//! `server.admin_token` is configured.
//!
//! Holds are stored alongside the drops and reloaded at startup. With the
//! in-memory store they are lost on restart together with the drops.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get};
use axum::{Json, Router};
use tracing::info;

use crate::drop_id::DropId;
use crate::lifecycle::ReconciliationEntry;
use crate::state::AppState;

use super::{HttpError, bearer_matches};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/reconciliation", get(list_entries))
        .route("/admin/reconciliation/{id}", delete(resolve_entry))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(token) = state.admin_token.as_deref() else {
        return Err(HttpError::new(StatusCode::NOT_FOUND, "Not found".to_string()));
    };
    if bearer_matches(headers, token) {
        Ok(())
    } else {
        Err(HttpError::unauthorized())
    }
}

async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReconciliationEntry>>, HttpError> {
    authorize(&state, &headers)?;
    Ok(Json(state.engine.reconciliation().snapshot()))
}

/// Releases the hold once the operator has settled the payout by hand.
async fn resolve_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReconciliationEntry>, HttpError> {
    authorize(&state, &headers)?;
    let id = DropId::parse(&id)?;
    let entry = state.engine.release_hold(&id).await?.ok_or_else(|| {
        HttpError::new(
            StatusCode::NOT_FOUND,
            format!("No reconciliation entry for {id}"),
        )
    })?;
    info!(drop_id = %id, "Reconciliation hold released by operator");
    Ok(Json(entry))
}
