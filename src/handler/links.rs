use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
    Extension, Json, Router,
};
use validator::Validate;

use crate::{
    dtos::referraldtos::*,
    error::HttpError,
    middleware::{identity, link_rate_limiter, rate_limit_middleware, CallerIdentity},
    AppState,
};

pub fn links_handler() -> Router {
    let limiter = Arc::new(link_rate_limiter());

    Router::new()
        .route(
            "/link",
            post(generate_link)
                .layer(middleware::from_fn(identity))
                .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware)),
        )
        .route(
            "/share-message",
            post(share_message).layer(middleware::from_fn(identity)),
        )
}

pub async fn generate_link(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<GenerateLinkDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let link = app_state
        .link_service
        .generate_link(&caller.user_id, &body.channel)
        .await?;

    Ok((StatusCode::CREATED, Json(LinkResponseDto::from(link))))
}

pub async fn share_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<ShareMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let message = app_state
        .link_service
        .share_message(&caller.user_id, &body.channel, body.locale.as_deref())
        .await?;

    Ok(Json(ShareMessageResponseDto::from(message)))
}
