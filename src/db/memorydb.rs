// db/memorydb.rs
//! In-process store with the same constraint semantics as the Postgres schema.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! staged copy of the state, so concurrent transactions are fully serialized
//! and a dropped transaction leaves no trace.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{ReferralExt, ReferralTx, StoreError};

use crate::models::referralmodel::{
    CodeStatus, EventOrigin, LifecycleEvent, Referral, ReferralCode, ReferralLink, ReferralPage,
    ReferralSession, ReferralStatus,
};

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    pub codes: Vec<ReferralCode>,
    pub referrals: Vec<Referral>,
    pub events: Vec<LifecycleEvent>,
    pub sessions: Vec<ReferralSession>,
    pub links: Vec<ReferralLink>,
}

impl MemoryState {
    fn check_code_unique(&self, code: &ReferralCode) -> Result<(), StoreError> {
        if self
            .codes
            .iter()
            .any(|existing| existing.code.eq_ignore_ascii_case(&code.code))
        {
            return Err(StoreError::UniqueViolation("ux_referral_codes_code_upper".to_string()));
        }
        if self
            .codes
            .iter()
            .any(|existing| existing.owner_user_id == code.owner_user_id)
        {
            return Err(StoreError::UniqueViolation("ux_referral_codes_owner".to_string()));
        }
        Ok(())
    }

    fn check_referral_unique(&self, referral: &Referral) -> Result<(), StoreError> {
        let Some(referee) = referral.referee_user_id.as_deref() else {
            return Ok(());
        };
        if !referral.status.is_redemption() {
            return Ok(());
        }
        let clash = self.referrals.iter().any(|existing| {
            existing.id != referral.id
                && existing.code == referral.code
                && existing.referee_user_id.as_deref() == Some(referee)
                && existing.status.is_redemption()
        });
        if clash {
            return Err(StoreError::UniqueViolation(
                "ux_referrals_code_referee_redeemed".to_string(),
            ));
        }
        Ok(())
    }

    fn insert_event(&mut self, event: &LifecycleEvent) -> Result<(), StoreError> {
        if let Some(external_id) = event.external_event_id.as_deref() {
            if self
                .events
                .iter()
                .any(|existing| existing.external_event_id.as_deref() == Some(external_id))
            {
                return Err(StoreError::UniqueViolation(
                    "ux_referral_events_external_id".to_string(),
                ));
            }
        }
        if event.origin == EventOrigin::Redemption
            && self.events.iter().any(|existing| {
                existing.origin == EventOrigin::Redemption
                    && existing.code == event.code
                    && existing.event_type == event.event_type
            })
        {
            return Err(StoreError::UniqueViolation(
                "ux_referral_events_redemption_marker".to_string(),
            ));
        }
        self.events.push(event.clone());
        Ok(())
    }

    fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        self.check_referral_unique(referral)?;
        self.referrals.push(referral.clone());
        Ok(())
    }

    fn latest_referral<P>(&self, code: &str, predicate: P) -> Option<Referral>
    where
        P: Fn(&Referral) -> bool,
    {
        self.referrals
            .iter()
            .filter(|referral| referral.code == code && predicate(referral))
            .max_by_key(|referral| referral.invited_at)
            .cloned()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryDB {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    #[cfg(test)]
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl ReferralExt for MemoryDB {
    async fn begin(&self) -> Result<Box<dyn ReferralTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn get_event_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<LifecycleEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .find(|event| event.external_event_id.as_deref() == Some(external_event_id))
            .cloned())
    }

    async fn get_code(&self, code: &str) -> Result<Option<ReferralCode>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .codes
            .iter()
            .find(|existing| existing.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn get_code_for_user(&self, user_id: &str) -> Result<Option<ReferralCode>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .codes
            .iter()
            .find(|existing| existing.owner_user_id == user_id)
            .cloned())
    }

    async fn save_code(&self, code: &ReferralCode) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_code_unique(code)?;
        state.codes.push(code.clone());
        Ok(())
    }

    async fn update_code_status(
        &self,
        user_id: &str,
        status: CodeStatus,
    ) -> Result<Option<ReferralCode>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .codes
            .iter_mut()
            .find(|existing| existing.owner_user_id == user_id)
            .map(|existing| {
                existing.status = status;
                existing.clone()
            }))
    }

    async fn get_code_count(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.codes.len() as i64)
    }

    async fn get_referrals_for_referrer(
        &self,
        referrer_id: &str,
        status: Option<ReferralStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<ReferralPage, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Referral> = state
            .referrals
            .iter()
            .filter(|referral| referral.referrer_id == referrer_id)
            .filter(|referral| status.map_or(true, |wanted| referral.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.invited_at.cmp(&a.invited_at));

        let total = matching.len() as i64;
        let complete = matching
            .iter()
            .filter(|referral| referral.status == ReferralStatus::Complete)
            .count() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok(ReferralPage { items, total, complete })
    }

    async fn save_referral(&self, referral: &Referral) -> Result<(), StoreError> {
        self.state.lock().await.insert_referral(referral)
    }

    async fn get_live_link(
        &self,
        code: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralLink>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .iter()
            .filter(|link| {
                link.code == code && link.channel.as_deref() == Some(channel) && link.is_live(now)
            })
            .max_by_key(|link| link.created_at)
            .cloned())
    }

    async fn save_link(&self, link: &ReferralLink) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.links.iter().any(|existing| existing.id == link.id) {
            return Err(StoreError::UniqueViolation("referral_links_pkey".to_string()));
        }
        state.links.push(link.clone());
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl ReferralTx for MemoryTx {
    async fn lock_code(&mut self, code: &str) -> Result<Option<ReferralCode>, StoreError> {
        Ok(self
            .staged
            .codes
            .iter()
            .find(|existing| existing.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn insert_event(&mut self, event: &LifecycleEvent) -> Result<(), StoreError> {
        self.staged.insert_event(event)
    }

    async fn insert_redemption_marker(&mut self, event: &LifecycleEvent) -> Result<bool, StoreError> {
        let exists = self
            .staged
            .events
            .iter()
            .any(|existing| existing.code == event.code && existing.event_type == event.event_type);
        if exists {
            return Ok(false);
        }
        match self.staged.insert_event(event) {
            Ok(()) => Ok(true),
            Err(StoreError::UniqueViolation(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn get_latest_referral(&mut self, code: &str) -> Result<Option<Referral>, StoreError> {
        Ok(self.staged.latest_referral(code, |_| true))
    }

    async fn get_open_referral(
        &mut self,
        code: &str,
        referee_user_id: &str,
    ) -> Result<Option<Referral>, StoreError> {
        Ok(self.staged.latest_referral(code, |referral| {
            !matches!(referral.status, ReferralStatus::Complete | ReferralStatus::Rejected)
                && referral
                    .referee_user_id
                    .as_deref()
                    .map_or(true, |referee| referee == referee_user_id)
        }))
    }

    async fn has_redemption(&mut self, code: &str, referee_user_id: &str) -> Result<bool, StoreError> {
        Ok(self.staged.referrals.iter().any(|referral| {
            referral.code == code
                && referral.referee_user_id.as_deref() == Some(referee_user_id)
                && referral.status.is_redemption()
        }))
    }

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        self.staged.insert_referral(referral)
    }

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        self.staged.check_referral_unique(referral)?;
        if let Some(existing) = self
            .staged
            .referrals
            .iter_mut()
            .find(|existing| existing.id == referral.id)
        {
            existing.referee_user_id = referral.referee_user_id.clone();
            existing.status = referral.status;
            existing.registered_at = referral.registered_at;
        }
        Ok(())
    }

    async fn has_live_session(&mut self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .staged
            .sessions
            .iter()
            .any(|session| session.code == code && session.is_live(now)))
    }

    async fn lock_session_slot(&mut self, _code: &str, _device_id: &str) -> Result<(), StoreError> {
        // the whole store is already held by this transaction
        Ok(())
    }

    async fn get_live_session(
        &mut self,
        code: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralSession>, StoreError> {
        Ok(self
            .staged
            .sessions
            .iter()
            .filter(|session| {
                session.code == code && session.device_id == device_id && session.is_live(now)
            })
            .max_by_key(|session| session.expires_at)
            .cloned())
    }

    async fn insert_session(&mut self, session: &ReferralSession) -> Result<(), StoreError> {
        if self
            .staged
            .sessions
            .iter()
            .any(|existing| existing.session_id == session.session_id)
        {
            return Err(StoreError::UniqueViolation("referral_sessions_pkey".to_string()));
        }
        self.staged.sessions.push(session.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
