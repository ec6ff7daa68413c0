use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::lifecycle::FundingNotification;
use crate::models::payloads::{FundingWebhook, WebhookAck};
use crate::state::AppState;

use super::{HttpError, bearer_matches};

/// Gateway completion callback.
///
/// Any parsed notification is acknowledged, matched or not. Gateway and
/// store failures surface as errors so the sender can redeliver.
pub(super) async fn funding_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, HttpError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        if !bearer_matches(&headers, secret) {
            warn!("Funding notification rejected: bad credentials");
            return Err(HttpError::unauthorized());
        }
    }

    let payload: FundingWebhook = serde_json::from_slice(&body)
        .map_err(|err| HttpError::bad_request(format!("Invalid notification body: {err}")))?;
    debug!(
        payment_hash = payload.payment_hash.as_deref().unwrap_or("none"),
        "Funding notification received"
    );

    let notification = FundingNotification {
        memo: payload.memo.or(payload.description),
        payment_hash: payload.payment_hash,
    };
    let outcome = state
        .engine
        .handle_funding_notification(notification)
        .await?;

    Ok(Json(WebhookAck {
        ok: true,
        drop_id: outcome.drop_id().map(ToString::to_string),
    }))
}
