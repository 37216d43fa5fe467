use std::{borrow::Cow, sync::LazyLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    models::referralmodel::{Referral, ReferralCode, ReferralLink, ReferralSession, ReferralStatus},
    service::{
        lifecycle_service::{Redemption, ReferralOverview},
        link_service::ShareMessage,
        state_machine::EventKind,
    },
};

pub const LINK_CHANNELS: [&str; 3] = ["sms", "email", "generic"];

static CODE_REGEX: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9]{6,20}$").ok());

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::from(message));
    error
}

pub fn validate_referral_code(code: &str) -> Result<(), ValidationError> {
    let code_regex = CODE_REGEX
        .as_ref()
        .ok_or_else(|| ValidationError::new("Invalid code regex"))?;

    if !code_regex.is_match(code) {
        return Err(invalid(
            "invalid_referral_code",
            "Referral code must be 6-20 letters or digits",
        ));
    }
    Ok(())
}

pub fn validate_event_type(event_type: &str) -> Result<(), ValidationError> {
    if EventKind::parse(event_type).is_none() {
        return Err(invalid(
            "invalid_event_type",
            "Event must be one of click, install, open, registered, redeemed",
        ));
    }
    Ok(())
}

pub fn validate_link_channel(channel: &str) -> Result<(), ValidationError> {
    if !LINK_CHANNELS.contains(&channel) {
        return Err(invalid("invalid_channel", "Channel must be one of sms, email, generic"));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReferralQueryDto {
    #[validate(range(min = 1, max = 1_000_000, message = "Page must be between 1 and 1000000"))]
    pub page: Option<i64>,

    #[validate(range(min = 1, max = 100, message = "Size must be between 1 and 100"))]
    pub size: Option<i64>,

    #[validate(length(max = 32, message = "Status filter is too long"))]
    pub status: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateLinkDto {
    #[validate(custom = "validate_link_channel")]
    pub channel: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShareMessageDto {
    #[validate(custom = "validate_link_channel")]
    pub channel: String,

    #[validate(length(max = 10, message = "Locale must be at most 10 characters"))]
    pub locale: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoDto {
    #[validate(length(min = 3, max = 100, message = "Device ID must be between 3 and 100 characters"))]
    pub device_id: Option<String>,

    #[validate(length(max = 512, message = "User agent is too long"))]
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShareEventDto {
    #[validate(length(min = 1, max = 32, message = "Channel must be between 1 and 32 characters"))]
    pub channel: String,

    #[validate(
        length(max = 2048, message = "Link must be at most 2048 characters"),
        url(message = "Link must be a valid URL")
    )]
    pub link: String,

    #[validate]
    pub device_info: Option<DeviceInfoDto>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReferralEventDto {
    #[validate(custom = "validate_event_type")]
    pub event: String,

    #[validate(custom = "validate_referral_code")]
    pub referral_code: String,

    #[validate(length(min = 1, max = 64, message = "Event ID must be between 1 and 64 characters"))]
    pub event_id: Option<String>,

    #[validate]
    pub device_info: Option<DeviceInfoDto>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeDto {
    #[validate(custom = "validate_referral_code")]
    pub referral_code: String,

    #[validate(length(min = 3, max = 100, message = "Device ID must be between 3 and 100 characters"))]
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionDto {
    #[validate(custom = "validate_referral_code")]
    pub referral_code: String,

    #[validate(length(min = 3, max = 100, message = "Device ID must be between 3 and 100 characters"))]
    pub device_id: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemDto {
    #[validate(custom = "validate_referral_code")]
    pub referral_code: String,

    #[validate(length(min = 5, max = 50, message = "Referee user ID must be between 5 and 50 characters"))]
    pub referee_user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    pub total: i64,
    pub complete: i64,
    pub pending: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralItemDto {
    pub id: Uuid,
    pub status: ReferralStatus,
    pub channel: Option<String>,
    pub referee_user_id: Option<String>,
    pub invited_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
}

impl ReferralItemDto {
    pub fn from_model(referral: &Referral) -> Self {
        ReferralItemDto {
            id: referral.id,
            status: referral.status,
            channel: referral.channel.clone(),
            referee_user_id: referral.referee_user_id.clone(),
            invited_at: referral.invited_at,
            registered_at: referral.registered_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralListResponseDto {
    pub referral_code: String,
    pub summary: SummaryDto,
    pub items: Vec<ReferralItemDto>,
}

impl From<ReferralOverview> for ReferralListResponseDto {
    fn from(overview: ReferralOverview) -> Self {
        let page = overview.page;
        ReferralListResponseDto {
            referral_code: overview.code.unwrap_or_default(),
            summary: SummaryDto {
                total: page.total,
                complete: page.complete,
                pending: page.total - page.complete,
            },
            items: page.items.iter().map(ReferralItemDto::from_model).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponseDto {
    pub referral_link: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl From<ReferralLink> for LinkResponseDto {
    fn from(link: ReferralLink) -> Self {
        LinkResponseDto {
            referral_link: link.url,
            expires_at: link.expires_at,
            metadata: link.metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMessageResponseDto {
    pub subject: Option<String>,
    pub message: String,
    pub link: String,
}

impl From<ShareMessage> for ShareMessageResponseDto {
    fn from(share: ShareMessage) -> Self {
        ShareMessageResponseDto {
            subject: share.subject,
            message: share.message,
            link: share.link,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerSummaryDto {
    pub user_id: String,
    pub active_since: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignDto {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponseDto {
    pub is_valid: bool,
    pub referrer: Option<ReferrerSummaryDto>,
    pub campaign: CampaignDto,
}

impl VerifyCodeResponseDto {
    pub fn valid(code: &ReferralCode, campaign_id: &str) -> Self {
        VerifyCodeResponseDto {
            is_valid: true,
            referrer: Some(ReferrerSummaryDto {
                user_id: code.owner_user_id.clone(),
                active_since: code.created_at,
            }),
            campaign: CampaignDto {
                id: campaign_id.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponseDto {
    pub session_id: String,
    pub referral_code: String,
    pub expires_at: DateTime<Utc>,
}

impl From<ReferralSession> for SessionResponseDto {
    fn from(session: ReferralSession) -> Self {
        SessionResponseDto {
            session_id: session.session_id,
            referral_code: session.code,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponseDto {
    pub status: ReferralStatus,
    pub reward_eligible: bool,
}

impl From<Redemption> for RedeemResponseDto {
    fn from(redemption: Redemption) -> Self {
        RedeemResponseDto {
            status: redemption.status,
            reward_eligible: redemption.reward_eligible,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeResponseDto {
    pub referral_code: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<ReferralCode> for CodeResponseDto {
    fn from(code: ReferralCode) -> Self {
        CodeResponseDto {
            status: if code.is_active() { "active" } else { "inactive" }.to_string(),
            referral_code: code.code,
            created_at: code.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_code_rules() {
        assert!(validate_referral_code("XY7G4D").is_ok());
        assert!(validate_referral_code("abc123XYZ").is_ok());
        assert!(validate_referral_code("ABC12").is_err());
        assert!(validate_referral_code("ABC-123").is_err());
        assert!(validate_referral_code(&"A".repeat(21)).is_err());
    }

    #[test]
    fn event_dto_rejects_unknown_type_and_long_id() {
        let valid = ReferralEventDto {
            event: "click".to_string(),
            referral_code: "XY7G4D".to_string(),
            event_id: Some("e1".to_string()),
            device_info: None,
        };
        assert!(valid.validate().is_ok());

        let unknown = ReferralEventDto { event: "teleport".to_string(), ..valid.clone() };
        assert!(unknown.validate().is_err());

        let long_id = ReferralEventDto { event_id: Some("x".repeat(65)), ..valid.clone() };
        assert!(long_id.validate().is_err());

        let short_device = ReferralEventDto {
            device_info: Some(DeviceInfoDto { device_id: Some("ab".to_string()), user_agent: None }),
            ..valid
        };
        assert!(short_device.validate().is_err());
    }

    #[test]
    fn link_channel_is_closed_set() {
        assert!(GenerateLinkDto { channel: "email".to_string() }.validate().is_ok());
        assert!(GenerateLinkDto { channel: "fax".to_string() }.validate().is_err());
    }

    #[test]
    fn share_event_requires_url() {
        let share = ShareEventDto {
            channel: "sms".to_string(),
            link: "https://cartoncaps.link/abc?ref=XY7G4D".to_string(),
            device_info: None,
        };
        assert!(share.validate().is_ok());
        assert!(ShareEventDto { link: "not a link".to_string(), ..share }.validate().is_err());
    }

    #[test]
    fn redeem_dto_bounds_referee() {
        let redeem = RedeemDto {
            referral_code: "XY7G4D".to_string(),
            referee_user_id: "usr1".to_string(),
        };
        assert!(redeem.validate().is_err());
    }

    #[test]
    fn query_bounds() {
        assert!(ReferralQueryDto { page: Some(0), ..Default::default() }.validate().is_err());
        assert!(ReferralQueryDto { size: Some(101), ..Default::default() }.validate().is_err());
        assert!(ReferralQueryDto { page: Some(i64::MAX), ..Default::default() }
            .validate()
            .is_err());
        assert!(ReferralQueryDto { page: Some(2), size: Some(100), status: None }
            .validate()
            .is_ok());
    }

    #[test]
    fn status_serializes_lowercase() {
        let body = serde_json::to_value(RedeemResponseDto {
            status: ReferralStatus::Complete,
            reward_eligible: true,
        })
        .unwrap();
        assert_eq!(body["status"], "complete");
        assert_eq!(body["rewardEligible"], true);
    }
}
