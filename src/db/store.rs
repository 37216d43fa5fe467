// db/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::referralmodel::{
    CodeStatus, LifecycleEvent, Referral, ReferralCode, ReferralLink, ReferralPage,
    ReferralSession, ReferralStatus,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Failures worth one more attempt: timeouts, deadlocks, serialization
    /// conflicts and pool exhaustion.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) => match db_error.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(
                    db_error
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| db_error.message().to_string()),
                ),
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => {
                    StoreError::Transient(db_error.message().to_string())
                }
                _ => StoreError::Database(error.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(error.to_string()),
            _ => StoreError::Database(error.to_string()),
        }
    }
}

/// Store operations that run outside an explicit transaction, plus the entry
/// point into one.
#[async_trait]
pub trait ReferralExt: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReferralTx>, StoreError>;

    async fn get_event_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<LifecycleEvent>, StoreError>;

    /// Case-insensitive lookup.
    async fn get_code(&self, code: &str) -> Result<Option<ReferralCode>, StoreError>;

    async fn get_code_for_user(&self, user_id: &str) -> Result<Option<ReferralCode>, StoreError>;

    /// Fails with `UniqueViolation` when the code or the owner is taken.
    async fn save_code(&self, code: &ReferralCode) -> Result<(), StoreError>;

    async fn update_code_status(
        &self,
        user_id: &str,
        status: CodeStatus,
    ) -> Result<Option<ReferralCode>, StoreError>;

    async fn get_code_count(&self) -> Result<i64, StoreError>;

    async fn get_referrals_for_referrer(
        &self,
        referrer_id: &str,
        status: Option<ReferralStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<ReferralPage, StoreError>;

    async fn save_referral(&self, referral: &Referral) -> Result<(), StoreError>;

    /// Most recently created link for `code` + `channel` still valid at `now`.
    async fn get_live_link(
        &self,
        code: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralLink>, StoreError>;

    async fn save_link(&self, link: &ReferralLink) -> Result<(), StoreError>;
}

/// One all-or-nothing unit of work. Dropping without `commit` rolls back.
#[async_trait]
pub trait ReferralTx: Send {
    /// Case-insensitive code lookup that serializes later writers for the same
    /// code until this transaction ends. The returned row carries the stored
    /// spelling, which later calls in the transaction should use.
    async fn lock_code(&mut self, code: &str) -> Result<Option<ReferralCode>, StoreError>;

    /// Fails with `UniqueViolation` when `external_event_id` is already recorded.
    async fn insert_event(&mut self, event: &LifecycleEvent) -> Result<(), StoreError>;

    /// Appends the redemption marker unless a `redeemed` event of any origin
    /// already exists for the code. Returns whether a row was written.
    async fn insert_redemption_marker(&mut self, event: &LifecycleEvent) -> Result<bool, StoreError>;

    /// Record with the latest `invited_at` for `code`, whatever its status.
    async fn get_latest_referral(&mut self, code: &str) -> Result<Option<Referral>, StoreError>;

    /// Latest record for `code` that is neither complete nor rejected and not
    /// claimed by another referee.
    async fn get_open_referral(
        &mut self,
        code: &str,
        referee_user_id: &str,
    ) -> Result<Option<Referral>, StoreError>;

    async fn has_redemption(&mut self, code: &str, referee_user_id: &str) -> Result<bool, StoreError>;

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError>;

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError>;

    /// Any device.
    async fn has_live_session(&mut self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Serializes session issuance for one `(code, device_id)` pair.
    async fn lock_session_slot(&mut self, code: &str, device_id: &str) -> Result<(), StoreError>;

    async fn get_live_session(
        &mut self,
        code: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralSession>, StoreError>;

    async fn insert_session(&mut self, session: &ReferralSession) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
