// service/link_service.rs
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::store::ReferralExt,
    models::referralmodel::ReferralLink,
    service::{
        error::ServiceError,
        lifecycle_service::LifecycleService,
        referral::{generate_link_id, generate_referral_link},
        templates::{self, RenderedMessage},
    },
    utils::clock::Clock,
};

pub const LINK_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct ShareMessage {
    pub subject: Option<String>,
    pub message: String,
    pub link: String,
}

#[derive(Clone)]
pub struct LinkService {
    store: Arc<dyn ReferralExt>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<LifecycleService>,
    base_url: String,
    campaign_id: String,
}

impl std::fmt::Debug for LinkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkService")
            .field("base_url", &self.base_url)
            .field("campaign_id", &self.campaign_id)
            .finish_non_exhaustive()
    }
}

impl LinkService {
    pub fn new(
        store: Arc<dyn ReferralExt>,
        clock: Arc<dyn Clock>,
        lifecycle: Arc<LifecycleService>,
        base_url: impl Into<String>,
        campaign_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            lifecycle,
            base_url: base_url.into(),
            campaign_id: campaign_id.into(),
        }
    }

    pub async fn generate_link(
        &self,
        user_id: &str,
        channel: &str,
    ) -> Result<ReferralLink, ServiceError> {
        let code = self.lifecycle.issue_code(user_id).await?;
        let now = self.clock.now();
        let link_id = generate_link_id();

        let link = ReferralLink {
            url: generate_referral_link(&self.base_url, &link_id, &code.code),
            id: link_id,
            code: code.code,
            channel: Some(channel.to_string()),
            vendor_id: Some(Uuid::new_v4().to_string()),
            metadata: Some(json!({
                "channel": channel,
                "campaignId": self.campaign_id,
            })),
            expires_at: Some(now + Duration::days(LINK_TTL_DAYS)),
            created_at: now,
        };
        self.store.save_link(&link).await?;

        tracing::info!("Generated {} link {} for {}", channel, link.id, user_id);
        Ok(link)
    }

    /// Channel message around the newest live link, minting one if needed.
    pub async fn share_message(
        &self,
        user_id: &str,
        channel: &str,
        locale: Option<&str>,
    ) -> Result<ShareMessage, ServiceError> {
        if let Some(locale) = locale.filter(|locale| !locale.eq_ignore_ascii_case("en")) {
            tracing::debug!("No templates for locale {}, using en", locale);
        }

        let existing = match self.store.get_code_for_user(user_id).await? {
            Some(code) => {
                self.store
                    .get_live_link(&code.code, channel, self.clock.now())
                    .await?
            }
            None => None,
        };

        let url = match existing {
            Some(link) => link.url,
            None => self.generate_link(user_id, channel).await?.url,
        };

        let RenderedMessage { subject, message } = templates::render(channel, &url);
        Ok(ShareMessage {
            subject,
            message,
            link: url,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{db::memorydb::MemoryDB, utils::clock::ManualClock};

    fn service() -> (MemoryDB, Arc<ManualClock>, LinkService) {
        let db = MemoryDB::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: Arc<dyn ReferralExt> = Arc::new(db.clone());
        let lifecycle = Arc::new(LifecycleService::new(store.clone(), clock.clone()));
        let links = LinkService::new(
            store,
            clock.clone(),
            lifecycle,
            "https://cartoncaps.link",
            "fall-2024",
        );
        (db, clock, links)
    }

    #[tokio::test]
    async fn test_generate_link_issues_code_and_tags_metadata() {
        let (db, clock, links) = service();
        let link = links.generate_link("U1", "sms").await.unwrap();

        let code = db.get_code_for_user("U1").await.unwrap().unwrap();
        assert_eq!(link.code, code.code);
        assert_eq!(
            link.url,
            format!("https://cartoncaps.link/{}?ref={}", link.id, code.code)
        );
        assert_eq!(link.expires_at, Some(clock.now() + Duration::days(LINK_TTL_DAYS)));

        let metadata = link.metadata.unwrap();
        assert_eq!(metadata["channel"], "sms");
        assert_eq!(metadata["campaignId"], "fall-2024");
    }

    #[tokio::test]
    async fn test_share_message_reuses_live_link() {
        let (db, clock, links) = service();
        let first = links.share_message("U1", "sms", None).await.unwrap();
        clock.advance(Duration::days(1));
        let second = links.share_message("U1", "sms", Some("en")).await.unwrap();

        assert_eq!(first.link, second.link);
        assert!(second.subject.is_none());
        assert!(second.message.contains(&second.link));
        assert_eq!(db.snapshot().await.links.len(), 1);
    }

    #[tokio::test]
    async fn test_share_message_per_channel_and_expiry() {
        let (db, clock, links) = service();
        let sms = links.share_message("U1", "sms", None).await.unwrap();
        let email = links.share_message("U1", "email", None).await.unwrap();
        assert_ne!(sms.link, email.link);
        assert!(email.subject.is_some());

        clock.advance(Duration::days(LINK_TTL_DAYS) + Duration::seconds(1));
        let renewed = links.share_message("U1", "sms", None).await.unwrap();
        assert_ne!(renewed.link, sms.link);
        assert_eq!(db.snapshot().await.links.len(), 3);
    }
}
