// service/lifecycle_service.rs
use std::{future::Future, sync::Arc};

use chrono::Duration;
use uuid::Uuid;

use crate::{
    db::store::{ReferralExt, StoreError},
    models::referralmodel::*,
    service::{
        error::ServiceError,
        referral::{generate_referral_code, generate_session_id},
        state_machine::{advance, EventKind},
    },
    utils::clock::Clock,
};

pub const SESSION_TTL_HOURS: i64 = 2;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE: i64 = 1_000_000;

const CODE_ISSUE_ATTEMPTS: usize = 5;

pub const SEED_REFERRER_ID: &str = "usr_referrer_001";
pub const SEED_CODE: &str = "XY7G4D";

/// A lifecycle event as reported by a client or vendor SDK.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub code: String,
    pub external_event_id: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The external event id was already in the ledger; nothing changed.
    Duplicate,
    /// Recorded against a code nobody owns.
    UnknownCode,
    Applied { referral_id: Uuid, status: ReferralStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    pub status: ReferralStatus,
    pub reward_eligible: bool,
}

#[derive(Debug, Clone)]
pub struct ReferralOverview {
    pub code: Option<String>,
    pub page: ReferralPage,
}

#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn ReferralExt>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService").finish_non_exhaustive()
    }
}

impl LifecycleService {
    pub fn new(store: Arc<dyn ReferralExt>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records a vendor event and advances the code's current referral.
    ///
    /// Replays of a known external event id are accepted without side effects,
    /// including when two copies race each other.
    pub async fn ingest_event(&self, event: &NewEvent) -> Result<IngestOutcome, ServiceError> {
        with_one_retry("ingest_event", move || self.try_ingest_event(event)).await
    }

    async fn try_ingest_event(&self, event: &NewEvent) -> Result<IngestOutcome, ServiceError> {
        let external_id = event
            .external_event_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if let Some(external_id) = external_id {
            if self.store.get_event_by_external_id(external_id).await?.is_some() {
                tracing::debug!("Duplicate event {} for code {} ignored", external_id, event.code);
                return Ok(IngestOutcome::Duplicate);
            }
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let registered = tx.lock_code(&event.code).await?;

        let ledger_row = LifecycleEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type.clone(),
            code: registered
                .as_ref()
                .map_or_else(|| event.code.clone(), |registered| registered.code.clone()),
            external_event_id: external_id.map(str::to_string),
            device_id: event.device_id.clone(),
            origin: EventOrigin::Vendor,
            occurred_at: now,
        };
        match tx.insert_event(&ledger_row).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                tracing::debug!(
                    "Concurrent duplicate of event {:?} for code {} ignored",
                    external_id,
                    event.code
                );
                return Ok(IngestOutcome::Duplicate);
            }
            Err(error) => return Err(error.into()),
        }

        let Some(code) = registered else {
            tx.commit().await?;
            tracing::debug!("Event {} recorded for unknown code {}", event.event_type, event.code);
            return Ok(IngestOutcome::UnknownCode);
        };

        let (mut referral, is_new) = match tx.get_latest_referral(&code.code).await? {
            Some(referral) => (referral, false),
            None => (Referral::invited(&code.owner_user_id, &code.code, None, now), true),
        };

        let previous = referral.status;
        referral.status = advance(Some(previous), &event.event_type);

        if is_new {
            tx.insert_referral(&referral).await?;
        } else if referral.status != previous {
            tx.update_referral(&referral).await?;
        }
        tx.commit().await?;

        if referral.status != previous || is_new {
            tracing::info!(
                "Referral {} for code {} moved {} -> {} on {}",
                referral.id,
                code.code,
                previous,
                referral.status,
                event.event_type
            );
        }

        Ok(IngestOutcome::Applied {
            referral_id: referral.id,
            status: referral.status,
        })
    }

    /// Redeems `code` for `referee_user_id` on behalf of `acting_user_id`.
    ///
    /// Never retried: a transient failure surfaces to the caller, who resubmits
    /// and goes through every guard again.
    pub async fn redeem(
        &self,
        acting_user_id: &str,
        code: &str,
        referee_user_id: &str,
    ) -> Result<Redemption, ServiceError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let Some(registered) = tx.lock_code(code).await? else {
            tracing::warn!("Redemption of unknown code {} by {}", code, acting_user_id);
            return Ok(Redemption {
                status: ReferralStatus::Complete,
                reward_eligible: false,
            });
        };

        // the registry's spelling from here on
        let code = registered.code.as_str();

        if registered.owner_user_id == referee_user_id {
            tracing::warn!("Self-referral attempt on code {} by {}", code, acting_user_id);
            return Err(ServiceError::SelfReferral(referee_user_id.to_string()));
        }

        let duplicate = || ServiceError::DuplicateRedemption {
            code: code.to_string(),
            referee: referee_user_id.to_string(),
        };

        if tx.has_redemption(code, referee_user_id).await? {
            tracing::warn!("Duplicate redemption of code {} for {}", code, referee_user_id);
            return Err(duplicate());
        }

        let verified = tx.has_live_session(code, now).await?;

        let (mut referral, is_new) = match tx.get_open_referral(code, referee_user_id).await? {
            Some(referral) => (referral, false),
            None => (Referral::invited(&registered.owner_user_id, code, None, now), true),
        };

        referral.referee_user_id = Some(referee_user_id.to_string());
        referral.registered_at = Some(now);
        referral.status = finalize_status(referral.status, verified);

        let written = if is_new {
            tx.insert_referral(&referral).await
        } else {
            tx.update_referral(&referral).await
        };
        if let Err(error) = written {
            return Err(match error {
                StoreError::UniqueViolation(_) => duplicate(),
                other => other.into(),
            });
        }

        let marker = LifecycleEvent {
            id: Uuid::new_v4(),
            event_type: EventKind::Redeemed.to_str().to_string(),
            code: code.to_string(),
            external_event_id: None,
            device_id: None,
            origin: EventOrigin::Redemption,
            occurred_at: now,
        };
        let appended = tx.insert_redemption_marker(&marker).await?;

        match tx.commit().await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => return Err(duplicate()),
            Err(error) => return Err(error.into()),
        }

        tracing::info!(
            "Code {} redeemed for {} by {}: {} (session verified: {}, marker appended: {})",
            code,
            referee_user_id,
            acting_user_id,
            referral.status,
            verified,
            appended
        );

        let complete = referral.status == ReferralStatus::Complete;
        Ok(Redemption {
            status: if complete {
                ReferralStatus::Complete
            } else {
                ReferralStatus::Registered
            },
            reward_eligible: complete,
        })
    }

    /// Returns the live session for `(code, device_id)` or issues a new one.
    pub async fn create_session(
        &self,
        code: &str,
        device_id: &str,
    ) -> Result<ReferralSession, ServiceError> {
        with_one_retry("create_session", move || self.try_create_session(code, device_id)).await
    }

    async fn try_create_session(
        &self,
        code: &str,
        device_id: &str,
    ) -> Result<ReferralSession, ServiceError> {
        let code = match self.store.get_code(code).await? {
            Some(registered) => registered.code,
            None => code.to_ascii_uppercase(),
        };
        let code = code.as_str();

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        tx.lock_session_slot(code, device_id).await?;

        if let Some(existing) = tx.get_live_session(code, device_id, now).await? {
            tracing::debug!("Reusing session {} for code {}", existing.session_id, code);
            return Ok(existing);
        }

        let session = ReferralSession {
            session_id: generate_session_id(),
            code: code.to_string(),
            device_id: device_id.to_string(),
            status: SessionStatus::Verified,
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        };
        tx.insert_session(&session).await?;
        tx.commit().await?;

        tracing::info!("Issued session {} for code {}", session.session_id, code);
        Ok(session)
    }

    pub async fn verify_code(&self, code: &str) -> Result<ReferralCode, ServiceError> {
        let registered = self
            .store
            .get_code(code)
            .await?
            .ok_or_else(|| ServiceError::CodeNotFound(code.to_string()))?;

        if !registered.is_active() {
            return Err(ServiceError::CodeInactive(registered.code));
        }
        Ok(registered)
    }

    pub async fn get_referrals(
        &self,
        referrer_id: &str,
        page: Option<i64>,
        size: Option<i64>,
        status: Option<&str>,
    ) -> Result<ReferralOverview, ServiceError> {
        let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
        let size = size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(size);

        let code = self
            .store
            .get_code_for_user(referrer_id)
            .await?
            .map(|registered| registered.code);

        let filter = status.map(str::trim).filter(|status| !status.is_empty());
        let page = match filter.map(str::parse::<ReferralStatus>) {
            Some(Err(_)) => ReferralPage {
                items: Vec::new(),
                total: 0,
                complete: 0,
            },
            parsed => {
                let status = parsed.and_then(Result::ok);
                self.store
                    .get_referrals_for_referrer(referrer_id, status, offset, size)
                    .await?
            }
        };

        Ok(ReferralOverview { code, page })
    }

    /// Starts a new invitation cycle when the sharer owns a code.
    pub async fn record_share(
        &self,
        user_id: &str,
        channel: &str,
    ) -> Result<Option<Referral>, ServiceError> {
        let Some(registered) = self.store.get_code_for_user(user_id).await? else {
            tracing::debug!("Share by {} ignored, no referral code", user_id);
            return Ok(None);
        };

        let referral = Referral::invited(
            user_id,
            &registered.code,
            Some(channel.to_string()),
            self.clock.now(),
        );
        self.store.save_referral(&referral).await?;

        tracing::info!("Recorded {} share for code {}", channel, registered.code);
        Ok(Some(referral))
    }

    /// The caller's code, minted on first use.
    pub async fn issue_code(&self, user_id: &str) -> Result<ReferralCode, ServiceError> {
        if let Some(existing) = self.store.get_code_for_user(user_id).await? {
            return Ok(existing);
        }

        let mut last_error = None;
        for _ in 0..CODE_ISSUE_ATTEMPTS {
            let candidate = ReferralCode {
                code: generate_referral_code(),
                owner_user_id: user_id.to_string(),
                status: CodeStatus::Active,
                created_at: self.clock.now(),
            };

            match self.store.save_code(&candidate).await {
                Ok(()) => {
                    tracing::info!("Issued referral code {} to {}", candidate.code, user_id);
                    return Ok(candidate);
                }
                Err(error @ StoreError::UniqueViolation(_)) => {
                    // either the code collided or a concurrent request already issued one
                    if let Some(existing) = self.store.get_code_for_user(user_id).await? {
                        return Ok(existing);
                    }
                    tracing::warn!("Referral code {} collided, retrying", candidate.code);
                    last_error = Some(error);
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Database("code issuance exhausted".to_string()))
            .into())
    }

    pub async fn retire_code(&self, user_id: &str) -> Result<ReferralCode, ServiceError> {
        let retired = self
            .store
            .update_code_status(user_id, CodeStatus::Inactive)
            .await?
            .ok_or_else(|| ServiceError::CodeNotFound(user_id.to_string()))?;

        tracing::info!("Retired referral code {} of {}", retired.code, user_id);
        Ok(retired)
    }

    /// Loads demo data into an empty store. Returns whether anything was written.
    pub async fn seed(&self) -> Result<bool, ServiceError> {
        if self.store.get_code_count().await? > 0 {
            return Ok(false);
        }

        let now = self.clock.now();
        self.store
            .save_code(&ReferralCode {
                code: SEED_CODE.to_string(),
                owner_user_id: SEED_REFERRER_ID.to_string(),
                status: CodeStatus::Active,
                created_at: now,
            })
            .await?;

        let seeded = [
            ("sms", ReferralStatus::Complete, Some(20)),
            ("email", ReferralStatus::Complete, Some(15)),
            ("generic", ReferralStatus::Invited, None),
        ];
        for (index, (channel, status, registered_days_ago)) in seeded.into_iter().enumerate() {
            let mut referral = Referral::invited(
                SEED_REFERRER_ID,
                SEED_CODE,
                Some(channel.to_string()),
                now - Duration::days(30) + Duration::days(index as i64),
            );
            referral.status = status;
            referral.registered_at = registered_days_ago.map(|days| now - Duration::days(days));
            self.store.save_referral(&referral).await?;
        }

        tracing::info!("Seeded referral code {} for {}", SEED_CODE, SEED_REFERRER_ID);
        Ok(true)
    }
}

/// Status after a redemption: `Complete` with a verified session, otherwise at
/// least `Registered` without ever moving backwards.
fn finalize_status(current: ReferralStatus, verified: bool) -> ReferralStatus {
    if verified {
        return ReferralStatus::Complete;
    }
    match current.order_index() {
        Some(index) if index > ReferralStatus::Registered.order_index().unwrap_or(0) => current,
        _ => ReferralStatus::Registered,
    }
}

async fn with_one_retry<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match attempt().await {
        Err(error) if error.is_transient() => {
            tracing::warn!("{} hit a transient failure, retrying once: {}", operation, error);
            attempt().await
        }
        result => result,
    }
}
