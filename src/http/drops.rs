//! Drop endpoints: creation, inspection, view accounting, claim, refund and
//! the public gallery of finished drops.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::drop::DropView;
use crate::models::payloads::{
    ClaimRequest, CreateDropRequest, CreateDropResponse, GalleryEntry, GalleryQuery,
    PayoutResponse, RefundRequest, ViewResponse,
};
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/drops", post(create_drop))
        .route("/drops/{id}", get(get_drop))
        .route("/drops/{id}/views", post(record_view))
        .route("/drops/{id}/claim", post(claim_drop))
        .route("/drops/{id}/refund", post(refund_drop))
        .route("/gallery", get(gallery))
}

async fn create_drop(
    State(state): State<AppState>,
    Json(request): Json<CreateDropRequest>,
) -> Result<(StatusCode, Json<CreateDropResponse>), HttpError> {
    let created = state.engine.create(request.into()).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_drop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DropView>, HttpError> {
    Ok(Json(state.engine.view(&id).await?))
}

async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ViewResponse>, HttpError> {
    let outcome = state.engine.record_view(&id).await?;
    Ok(Json(outcome.into()))
}

async fn claim_drop(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<PayoutResponse>, HttpError> {
    let payout = state
        .engine
        .claim(
            &id,
            &request.payment_request,
            request.captcha_token.as_deref(),
        )
        .await?;
    state.cache.gallery.invalidate_all();
    Ok(Json(payout.into()))
}

async fn refund_drop(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<PayoutResponse>, HttpError> {
    let payout = state
        .engine
        .refund(&id, &request.payment_request)
        .await?;
    state.cache.gallery.invalidate_all();
    Ok(Json(payout.into()))
}

async fn gallery(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<Vec<GalleryEntry>>, HttpError> {
    let limit = query
        .resolved_limit()
        .ok_or_else(|| HttpError::bad_request("limit must be between 1 and 100"))?;

    if let Some(cached) = state.cache.gallery.get(&limit).await {
        return Ok(Json(cached.as_ref().clone()));
    }

    let entries: Vec<GalleryEntry> = state
        .engine
        .list_gallery(limit)
        .await?
        .iter()
        .map(GalleryEntry::from)
        .collect();
    state
        .cache
        .gallery
        .insert(limit, Arc::new(entries.clone()))
        .await;
    Ok(Json(entries))
}
