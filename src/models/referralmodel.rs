use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "code_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Active,
    Inactive,
}

/// Lifecycle status of a referral record.
///
/// `Invited` through `Complete` form a total order (see [`ReferralStatus::LIFECYCLE`]).
/// `Rejected` sits outside that order and is only ever set by moderation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "referral_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Invited,
    Clicked,
    Installed,
    Open,
    Registered,
    Redeemed,
    Complete,
    Rejected,
}

impl ReferralStatus {
    /// Ascending lifecycle order. Single source of truth for progression.
    pub const LIFECYCLE: [ReferralStatus; 7] = [
        ReferralStatus::Invited,
        ReferralStatus::Clicked,
        ReferralStatus::Installed,
        ReferralStatus::Open,
        ReferralStatus::Registered,
        ReferralStatus::Redeemed,
        ReferralStatus::Complete,
    ];

    pub fn to_str(&self) -> &'static str {
        match self {
            ReferralStatus::Invited => "invited",
            ReferralStatus::Clicked => "clicked",
            ReferralStatus::Installed => "installed",
            ReferralStatus::Open => "open",
            ReferralStatus::Registered => "registered",
            ReferralStatus::Redeemed => "redeemed",
            ReferralStatus::Complete => "complete",
            ReferralStatus::Rejected => "rejected",
        }
    }

    /// Position in [`ReferralStatus::LIFECYCLE`], `None` for `Rejected`.
    pub fn order_index(&self) -> Option<usize> {
        Self::LIFECYCLE.iter().position(|status| status == self)
    }

    /// Statuses that mean the referee has already claimed the code.
    pub fn is_redemption(&self) -> bool {
        matches!(
            self,
            ReferralStatus::Registered | ReferralStatus::Redeemed | ReferralStatus::Complete
        )
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

impl FromStr for ReferralStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::LIFECYCLE
            .iter()
            .chain(std::iter::once(&ReferralStatus::Rejected))
            .find(|status| status.to_str() == lowered)
            .copied()
            .ok_or_else(|| format!("Unknown referral status: {}", s))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, sqlx::FromRow)]
pub struct ReferralCode {
    pub code: String,
    pub owner_user_id: String,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
}

impl ReferralCode {
    pub fn is_active(&self) -> bool {
        self.status == CodeStatus::Active
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, sqlx::FromRow)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: String,
    pub referee_user_id: Option<String>,
    pub code: String,
    pub status: ReferralStatus,
    pub channel: Option<String>,
    pub invited_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
}

impl Referral {
    /// A fresh invitation cycle for `code`, owned by `referrer_id`.
    pub fn invited(
        referrer_id: &str,
        code: &str,
        channel: Option<String>,
        invited_at: DateTime<Utc>,
    ) -> Self {
        Referral {
            id: Uuid::new_v4(),
            referrer_id: referrer_id.to_string(),
            referee_user_id: None,
            code: code.to_string(),
            status: ReferralStatus::Invited,
            channel,
            invited_at,
            registered_at: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "event_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Reported by a client or vendor SDK.
    Vendor,
    /// The once-per-code marker appended by redemption.
    Redemption,
}

#[derive(Debug, Deserialize, Serialize, Clone, sqlx::FromRow)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub event_type: String,
    pub code: String,
    pub external_event_id: Option<String>,
    pub device_id: Option<String>,
    pub origin: EventOrigin,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Verified,
}

#[derive(Debug, Deserialize, Serialize, Clone, sqlx::FromRow)]
pub struct ReferralSession {
    pub session_id: String,
    pub code: String,
    pub device_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReferralSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, sqlx::FromRow)]
pub struct ReferralLink {
    pub id: String,
    pub code: String,
    pub url: String,
    pub channel: Option<String>,
    pub vendor_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReferralLink {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// One page of a referrer's records plus counts over the whole filtered set.
#[derive(Debug, Clone)]
pub struct ReferralPage {
    pub items: Vec<Referral>,
    pub total: i64,
    pub complete: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_order_is_ascending() {
        let indices: Vec<usize> = ReferralStatus::LIFECYCLE
            .iter()
            .filter_map(|status| status.order_index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(ReferralStatus::Rejected.order_index(), None);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("COMPLETE".parse::<ReferralStatus>(), Ok(ReferralStatus::Complete));
        assert_eq!(" open ".parse::<ReferralStatus>(), Ok(ReferralStatus::Open));
        assert_eq!("rejected".parse::<ReferralStatus>(), Ok(ReferralStatus::Rejected));
        assert!("pending".parse::<ReferralStatus>().is_err());
    }

    #[test]
    fn redemption_statuses() {
        assert!(ReferralStatus::Registered.is_redemption());
        assert!(ReferralStatus::Redeemed.is_redemption());
        assert!(ReferralStatus::Complete.is_redemption());
        assert!(!ReferralStatus::Open.is_redemption());
        assert!(!ReferralStatus::Rejected.is_redemption());
    }

    #[test]
    fn link_without_expiry_stays_live() {
        let now = Utc::now();
        let link = ReferralLink {
            id: "l1".to_string(),
            code: "XY7G4D".to_string(),
            url: "https://cartoncaps.link/l1?ref=XY7G4D".to_string(),
            channel: Some("sms".to_string()),
            vendor_id: None,
            metadata: None,
            expires_at: None,
            created_at: now,
        };
        assert!(link.is_live(now + chrono::Duration::days(365)));
    }
}
