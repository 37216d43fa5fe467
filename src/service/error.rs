use thiserror::Error;

use crate::{
    db::store::StoreError,
    error::{ErrorMessage, HttpError},
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Referral code {0} not found")]
    CodeNotFound(String),

    #[error("Referral code {0} is inactive")]
    CodeInactive(String),

    #[error("User {0} cannot redeem their own referral code")]
    SelfReferral(String),

    #[error("User {referee} has already redeemed code {code}")]
    DuplicateRedemption { code: String, referee: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Store(error) if error.is_transient())
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::CodeNotFound(_) => {
                HttpError::not_found(ErrorMessage::CodeNotFound.to_string())
            }
            ServiceError::CodeInactive(_) => HttpError::gone(ErrorMessage::CodeInactive.to_string()),
            ServiceError::SelfReferral(_) => {
                HttpError::forbidden(ErrorMessage::SelfReferral.to_string())
            }
            ServiceError::DuplicateRedemption { .. } => {
                HttpError::conflict(ErrorMessage::DuplicateRedemption.to_string())
            }
            ServiceError::Store(store_error) => {
                tracing::error!("Storage failure: {}", store_error);
                HttpError::server_error(ErrorMessage::ServerError.to_string())
            }
        }
    }
}
