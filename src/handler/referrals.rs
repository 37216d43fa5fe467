use std::sync::Arc;

use axum::{
    extract::Query,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use validator::Validate;

use crate::{
    dtos::referraldtos::*,
    error::HttpError,
    middleware::{identity, CallerIdentity},
    AppState,
};

pub fn referrals_handler() -> Router {
    Router::new()
        .route(
            "/",
            get(get_referrals).layer(middleware::from_fn(identity)),
        )
        .route("/verify", post(verify_code))
        .route("/session", post(create_session))
        .route(
            "/redeem",
            patch(redeem_code).layer(middleware::from_fn(identity)),
        )
        .route(
            "/code",
            post(issue_code).layer(middleware::from_fn(identity)),
        )
        .route(
            "/code/retire",
            post(retire_code).layer(middleware::from_fn(identity)),
        )
}

pub async fn get_referrals(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ReferralQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query
        .validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let overview = app_state
        .lifecycle_service
        .get_referrals(&caller.user_id, query.page, query.size, query.status.as_deref())
        .await?;

    Ok(Json(ReferralListResponseDto::from(overview)))
}

pub async fn verify_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<VerifyCodeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let code = app_state
        .lifecycle_service
        .verify_code(&body.referral_code)
        .await?;

    Ok(Json(VerifyCodeResponseDto::valid(&code, &app_state.env.campaign_id)))
}

pub async fn create_session(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<CreateSessionDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let session = app_state
        .lifecycle_service
        .create_session(&body.referral_code, &body.device_id)
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponseDto::from(session))))
}

pub async fn redeem_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<RedeemDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let redemption = app_state
        .lifecycle_service
        .redeem(&caller.user_id, &body.referral_code, &body.referee_user_id)
        .await?;

    Ok(Json(RedeemResponseDto::from(redemption)))
}

pub async fn issue_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, HttpError> {
    let code = app_state.lifecycle_service.issue_code(&caller.user_id).await?;
    Ok(Json(CodeResponseDto::from(code)))
}

pub async fn retire_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, HttpError> {
    let code = app_state.lifecycle_service.retire_code(&caller.user_id).await?;
    Ok(Json(CodeResponseDto::from(code)))
}
