use axum::{extract::Request, middleware::Next, response::IntoResponse};

use crate::error::{ErrorMessage, HttpError};

/// Header the gateway uses to pass the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_USER_ID_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
}

pub async fn identity(mut req: Request, next: Next) -> Result<impl IntoResponse, HttpError> {
    let header = req
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::IdentityNotProvided.to_string()))?;

    let user_id = header
        .to_str()
        .map(str::trim)
        .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidIdentity.to_string()))?;

    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(HttpError::unauthorized(ErrorMessage::InvalidIdentity.to_string()));
    }

    let caller = CallerIdentity {
        user_id: user_id.to_string(),
    };
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
