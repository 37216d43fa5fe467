use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
    Extension, Json, Router,
};
use serde_json::json;
use validator::Validate;

use crate::{
    dtos::referraldtos::*,
    error::HttpError,
    middleware::{identity, rate_limit_middleware, share_rate_limiter, CallerIdentity},
    service::lifecycle_service::{IngestOutcome, NewEvent},
    AppState,
};

pub fn events_handler() -> Router {
    let limiter = Arc::new(share_rate_limiter());

    Router::new()
        .route(
            "/share",
            post(record_share)
                .layer(middleware::from_fn(identity))
                .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware)),
        )
        .route("/events", post(ingest_event))
}

pub async fn record_share(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<ShareEventDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    app_state
        .lifecycle_service
        .record_share(&caller.user_id, &body.channel)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// Always 202 once the body is valid: replays and unknown codes are accepted too.
pub async fn ingest_event(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<ReferralEventDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let event = NewEvent {
        event_type: body.event,
        code: body.referral_code,
        external_event_id: body.event_id,
        device_id: body.device_info.and_then(|device| device.device_id),
    };
    let outcome = app_state.lifecycle_service.ingest_event(&event).await?;

    let body = match outcome {
        IngestOutcome::Duplicate => json!({ "status": "accepted", "outcome": "duplicate" }),
        IngestOutcome::UnknownCode => json!({ "status": "accepted", "outcome": "unknown_code" }),
        IngestOutcome::Applied { referral_id, status } => json!({
            "status": "accepted",
            "outcome": "applied",
            "referralId": referral_id,
            "referralStatus": status,
        }),
    };

    Ok((StatusCode::ACCEPTED, Json(body)))
}
