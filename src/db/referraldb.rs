// db/referraldb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use super::{
    db::DBClient,
    query_timeout::QueryTimeout,
    store::{ReferralExt, ReferralTx, StoreError},
};

use crate::models::referralmodel::{
    CodeStatus, LifecycleEvent, Referral, ReferralCode, ReferralLink, ReferralPage,
    ReferralSession, ReferralStatus,
};

const REFERRAL_COLUMNS: &str =
    "id, referrer_id, referee_user_id, code, status, channel, invited_at, registered_at";

const EVENT_COLUMNS: &str =
    "id, event_type, code, external_event_id, device_id, origin, occurred_at";

#[async_trait]
impl ReferralExt for DBClient {
    async fn begin(&self) -> Result<Box<dyn ReferralTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReferralTx { tx }))
    }

    async fn get_event_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<LifecycleEvent>, StoreError> {
        let query = format!(
            "SELECT {} FROM referral_events WHERE external_event_id = $1",
            EVENT_COLUMNS
        );
        QueryTimeout::execute_with_timeout(
            sqlx::query_as::<_, LifecycleEvent>(&query)
                .bind(external_event_id)
                .fetch_optional(&self.pool),
            QueryTimeout::LOOKUP_TIMEOUT,
        )
        .await
    }

    async fn get_code(&self, code: &str) -> Result<Option<ReferralCode>, StoreError> {
        QueryTimeout::execute_with_timeout(
            sqlx::query_as::<_, ReferralCode>(
                r#"
                SELECT code, owner_user_id, status, created_at
                FROM referral_codes
                WHERE UPPER(code) = UPPER($1)
                "#,
            )
            .bind(code)
            .fetch_optional(&self.pool),
            QueryTimeout::LOOKUP_TIMEOUT,
        )
        .await
    }

    async fn get_code_for_user(&self, user_id: &str) -> Result<Option<ReferralCode>, StoreError> {
        QueryTimeout::execute_with_timeout(
            sqlx::query_as::<_, ReferralCode>(
                r#"
                SELECT code, owner_user_id, status, created_at
                FROM referral_codes
                WHERE owner_user_id = $1
                "#,
            )
            .bind(user_id)
            .fetch_optional(&self.pool),
            QueryTimeout::LOOKUP_TIMEOUT,
        )
        .await
    }

    async fn save_code(&self, code: &ReferralCode) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referral_codes (code, owner_user_id, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&code.code)
        .bind(&code.owner_user_id)
        .bind(code.status)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_code_status(
        &self,
        user_id: &str,
        status: CodeStatus,
    ) -> Result<Option<ReferralCode>, StoreError> {
        let code = sqlx::query_as::<_, ReferralCode>(
            r#"
            UPDATE referral_codes
            SET status = $1
            WHERE owner_user_id = $2
            RETURNING code, owner_user_id, status, created_at
            "#,
        )
        .bind(status)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn get_code_count(&self) -> Result<i64, StoreError> {
        QueryTimeout::execute_with_timeout(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM referral_codes").fetch_one(&self.pool),
            QueryTimeout::DEFAULT_TIMEOUT,
        )
        .await
    }

    async fn get_referrals_for_referrer(
        &self,
        referrer_id: &str,
        status: Option<ReferralStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<ReferralPage, StoreError> {
        let counts = QueryTimeout::execute_with_timeout(
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'complete') AS complete
                FROM referrals
                WHERE referrer_id = $1
                  AND ($2::referral_status IS NULL OR status = $2)
                "#,
            )
            .bind(referrer_id)
            .bind(status)
            .fetch_one(&self.pool),
            QueryTimeout::AGGREGATION_TIMEOUT,
        )
        .await?;

        let query = format!(
            r#"
            SELECT {}
            FROM referrals
            WHERE referrer_id = $1
              AND ($2::referral_status IS NULL OR status = $2)
            ORDER BY invited_at DESC
            OFFSET $3
            LIMIT $4
            "#,
            REFERRAL_COLUMNS
        );
        let items = QueryTimeout::execute_with_timeout(
            sqlx::query_as::<_, Referral>(&query)
                .bind(referrer_id)
                .bind(status)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool),
            QueryTimeout::AGGREGATION_TIMEOUT,
        )
        .await?;

        Ok(ReferralPage {
            items,
            total: counts.get::<i64, _>("total"),
            complete: counts.get::<i64, _>("complete"),
        })
    }

    async fn save_referral(&self, referral: &Referral) -> Result<(), StoreError> {
        insert_referral_row(&self.pool, referral).await
    }

    async fn get_live_link(
        &self,
        code: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralLink>, StoreError> {
        QueryTimeout::execute_with_timeout(
            sqlx::query_as::<_, ReferralLink>(
                r#"
                SELECT id, code, url, channel, vendor_id, metadata, expires_at, created_at
                FROM referral_links
                WHERE code = $1
                  AND channel = $2
                  AND (expires_at IS NULL OR expires_at > $3)
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(code)
            .bind(channel)
            .bind(now)
            .fetch_optional(&self.pool),
            QueryTimeout::LOOKUP_TIMEOUT,
        )
        .await
    }

    async fn save_link(&self, link: &ReferralLink) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referral_links (id, code, url, channel, vendor_id, metadata, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&link.id)
        .bind(&link.code)
        .bind(&link.url)
        .bind(&link.channel)
        .bind(&link.vendor_id)
        .bind(&link.metadata)
        .bind(link.expires_at)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_referral_row<'e, E>(executor: E, referral: &Referral) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO referrals (id, referrer_id, referee_user_id, code, status, channel, invited_at, registered_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(referral.id)
    .bind(&referral.referrer_id)
    .bind(&referral.referee_user_id)
    .bind(&referral.code)
    .bind(referral.status)
    .bind(&referral.channel)
    .bind(referral.invited_at)
    .bind(referral.registered_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub struct PgReferralTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReferralTx for PgReferralTx {
    async fn lock_code(&mut self, code: &str) -> Result<Option<ReferralCode>, StoreError> {
        let code = sqlx::query_as::<_, ReferralCode>(
            r#"
            SELECT code, owner_user_id, status, created_at
            FROM referral_codes
            WHERE UPPER(code) = UPPER($1)
            FOR UPDATE
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(code)
    }

    async fn insert_event(&mut self, event: &LifecycleEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referral_events (id, event_type, code, external_event_id, device_id, origin, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.code)
        .bind(&event.external_event_id)
        .bind(&event.device_id)
        .bind(event.origin)
        .bind(event.occurred_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_redemption_marker(&mut self, event: &LifecycleEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO referral_events (id, event_type, code, external_event_id, device_id, origin, occurred_at)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (
                SELECT 1 FROM referral_events WHERE code = $3 AND event_type = $2
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.code)
        .bind(&event.external_event_id)
        .bind(&event.device_id)
        .bind(event.origin)
        .bind(event.occurred_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_latest_referral(&mut self, code: &str) -> Result<Option<Referral>, StoreError> {
        let query = format!(
            r#"
            SELECT {}
            FROM referrals
            WHERE code = $1
            ORDER BY invited_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
            REFERRAL_COLUMNS
        );
        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(referral)
    }

    async fn get_open_referral(
        &mut self,
        code: &str,
        referee_user_id: &str,
    ) -> Result<Option<Referral>, StoreError> {
        let query = format!(
            r#"
            SELECT {}
            FROM referrals
            WHERE code = $1
              AND status NOT IN ('complete', 'rejected')
              AND (referee_user_id IS NULL OR referee_user_id = $2)
            ORDER BY invited_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
            REFERRAL_COLUMNS
        );
        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(code)
            .bind(referee_user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(referral)
    }

    async fn has_redemption(&mut self, code: &str, referee_user_id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM referrals
                WHERE code = $1
                  AND referee_user_id = $2
                  AND status IN ('registered', 'redeemed', 'complete')
            )
            "#,
        )
        .bind(code)
        .bind(referee_user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        insert_referral_row(&mut *self.tx, referral).await
    }

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE referrals
            SET referee_user_id = $1, status = $2, registered_at = $3
            WHERE id = $4
            "#,
        )
        .bind(&referral.referee_user_id)
        .bind(referral.status)
        .bind(referral.registered_at)
        .bind(referral.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn has_live_session(&mut self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM referral_sessions WHERE code = $1 AND expires_at > $2)",
        )
        .bind(code)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn lock_session_slot(&mut self, code: &str, device_id: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("session:{}:{}", code, device_id))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_live_session(
        &mut self,
        code: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralSession>, StoreError> {
        let session = sqlx::query_as::<_, ReferralSession>(
            r#"
            SELECT session_id, code, device_id, status, created_at, expires_at
            FROM referral_sessions
            WHERE code = $1 AND device_id = $2 AND expires_at > $3
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .bind(device_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(session)
    }

    async fn insert_session(&mut self, session: &ReferralSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referral_sessions (session_id, code, device_id, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.code)
        .bind(&session.device_id)
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// These run against a scratch Postgres database:
/// `DATABASE_URL=postgres://... cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::{
        config::Config,
        models::referralmodel::EventOrigin,
        service::{
            error::ServiceError,
            lifecycle_service::{IngestOutcome, LifecycleService, NewEvent},
            referral::generate_referral_code,
        },
        utils::clock::SystemClock,
    };

    async fn connect() -> DBClient {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let client = DBClient::connect(&url, &Config::default()).await.unwrap();
        client.migrate().await.unwrap();
        client
    }

    async fn fresh_code(db: &DBClient) -> ReferralCode {
        let code = ReferralCode {
            code: generate_referral_code(),
            owner_user_id: format!("owner-{}", uuid::Uuid::new_v4().simple()),
            status: CodeStatus::Active,
            created_at: Utc::now(),
        };
        db.save_code(&code).await.unwrap();
        code
    }

    fn marker(code: &str) -> LifecycleEvent {
        LifecycleEvent {
            id: uuid::Uuid::new_v4(),
            event_type: "redeemed".to_string(),
            code: code.to_string(),
            external_event_id: None,
            device_id: None,
            origin: EventOrigin::Redemption,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_lock_code_matches_any_case() {
        let db = connect().await;
        let code = fresh_code(&db).await;

        let mut tx = db.begin().await.unwrap();
        let locked = tx.lock_code(&code.code.to_lowercase()).await.unwrap().unwrap();
        assert_eq!(locked.code, code.code);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redemption_marker_written_once() {
        let db = connect().await;
        let code = fresh_code(&db).await;

        let mut first = db.begin().await.unwrap();
        assert!(first.insert_redemption_marker(&marker(&code.code)).await.unwrap());
        first.commit().await.unwrap();

        let mut second = db.begin().await.unwrap();
        assert!(!second.insert_redemption_marker(&marker(&code.code)).await.unwrap());
        second.commit().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_second_registered_record_violates_referee_index() {
        let db = connect().await;
        let code = fresh_code(&db).await;

        let registered = || {
            let mut referral = Referral::invited(&code.owner_user_id, &code.code, None, Utc::now());
            referral.referee_user_id = Some("referee-1".to_string());
            referral.status = ReferralStatus::Registered;
            referral
        };

        let mut tx = db.begin().await.unwrap();
        tx.insert_referral(&registered()).await.unwrap();
        match tx.insert_referral(&registered()).await {
            Err(StoreError::UniqueViolation(constraint)) => {
                assert_eq!(constraint, "ux_referrals_code_referee_redeemed")
            }
            other => panic!("expected a unique violation, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_redemptions_conflict_on_postgres() {
        let db = connect().await;
        let code = fresh_code(&db).await;
        let service = LifecycleService::new(Arc::new(db.clone()), Arc::new(SystemClock));

        let (a, b) = tokio::join!(
            service.redeem("referee-1", &code.code, "referee-1"),
            service.redeem("referee-1", &code.code, "referee-1")
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(ServiceError::DuplicateRedemption { .. }))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_duplicate_ingestion_on_postgres() {
        let db = connect().await;
        let code = fresh_code(&db).await;
        let service = LifecycleService::new(Arc::new(db.clone()), Arc::new(SystemClock));
        let event = NewEvent {
            event_type: "click".to_string(),
            code: code.code.clone(),
            external_event_id: Some(format!("evt-{}", uuid::Uuid::new_v4().simple())),
            device_id: None,
        };

        let (a, b) = tokio::join!(service.ingest_event(&event), service.ingest_event(&event));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|outcome| **outcome == IngestOutcome::Duplicate).count(),
            1
        );
    }
}
