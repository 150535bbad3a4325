use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo_types::{Subscription, SubscriptionRow, UsageRecord};
use super::services::PERIOD_DAYS;

/// Per-user generation counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<UsageRecord>>;

    /// Zero the period counter and restart the period at `now`, if the
    /// current period has run its course.
    async fn reset_period(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()>;

    /// Count one successful generation. Must be a single atomic update.
    async fn increment(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()>;
}

/// Read access to billing state.
#[async_trait]
pub trait SubscriptionLookup: Send + Sync {
    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>>;
}

// ---- Postgres ----

#[derive(Clone)]
pub struct PgUsageStore {
    db: PgPool,
}

impl PgUsageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<UsageRecord>> {
        let row = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT user_id, period_used, period_start, daily_used, daily_date, lifetime_total
              FROM usage_records
             WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("load usage record")?;
        Ok(row)
    }

    async fn reset_period(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, period_used, period_start, daily_used, daily_date, lifetime_total)
            VALUES ($1, 0, $2, 0, $3, 0)
            ON CONFLICT (user_id) DO UPDATE
               SET period_used = 0,
                   period_start = EXCLUDED.period_start
             WHERE usage_records.period_start <= $4
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now.date())
        .bind(now - Duration::days(PERIOD_DAYS))
        .execute(&self.db)
        .await
        .context("reset usage period")?;
        Ok(())
    }

    async fn increment(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, period_used, period_start, daily_used, daily_date, lifetime_total)
            VALUES ($1, 1, $2, 1, $3, 1)
            ON CONFLICT (user_id) DO UPDATE
               SET period_used = usage_records.period_used + 1,
                   daily_used = CASE
                       WHEN usage_records.daily_date = EXCLUDED.daily_date
                       THEN usage_records.daily_used + 1
                       ELSE 1
                   END,
                   daily_date = EXCLUDED.daily_date,
                   lifetime_total = usage_records.lifetime_total + 1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now.date())
        .execute(&self.db)
        .await
        .context("increment usage")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSubscriptionLookup {
    db: PgPool,
}

impl PgSubscriptionLookup {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionLookup for PgSubscriptionLookup {
    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT status, plan_id FROM subscriptions WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("load subscription")?;
        Ok(row.map(Subscription::from))
    }
}

// ---- In-memory ----

#[derive(Default)]
pub struct MemoryUsageStore {
    records: Mutex<HashMap<Uuid, UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, record: UsageRecord) {
        self.records.lock().await.insert(record.user_id, record);
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<UsageRecord>> {
        Ok(self.records.lock().await.get(&user_id).cloned())
    }

    async fn reset_period(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(user_id)
            .or_insert_with(|| UsageRecord::new(user_id, now));
        if record.period_start <= now - Duration::days(PERIOD_DAYS) {
            record.period_used = 0;
            record.period_start = now;
        }
        Ok(())
    }

    async fn increment(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(user_id)
            .or_insert_with(|| UsageRecord::new(user_id, now));
        record.period_used += 1;
        if record.daily_date == now.date() {
            record.daily_used += 1;
        } else {
            record.daily_used = 1;
            record.daily_date = now.date();
        }
        record.lifetime_total += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySubscriptions {
    subs: Mutex<HashMap<Uuid, Subscription>>,
}

impl MemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: Uuid, subscription: Subscription) {
        self.subs.lock().await.insert(user_id, subscription);
    }
}

#[async_trait]
impl SubscriptionLookup for MemorySubscriptions {
    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>> {
        Ok(self.subs.lock().await.get(&user_id).cloned())
    }
}
