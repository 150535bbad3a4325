use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Generation counters for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub period_used: i32,          // generations in the current 30-day period
    pub period_start: OffsetDateTime,
    pub daily_used: i32,           // generations on `daily_date`
    pub daily_date: Date,
    pub lifetime_total: i64,
}

impl UsageRecord {
    pub fn new(user_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            period_used: 0,
            period_start: now,
            daily_used: 0,
            daily_date: now.date(),
            lifetime_total: 0,
        }
    }
}

/// Billing status as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "trialing" => Some(Self::Trialing),
            "past_due" => Some(Self::PastDue),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "incomplete" | "incomplete_expired" => Some(Self::Incomplete),
            "unpaid" => Some(Self::Unpaid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub status: SubscriptionStatus,
    pub plan_id: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct SubscriptionRow {
    pub status: String,
    pub plan_id: Option<String>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(r: SubscriptionRow) -> Self {
        Self {
            // Unknown provider states are treated like a lapsed subscription.
            status: SubscriptionStatus::parse(&r.status).unwrap_or(SubscriptionStatus::Unpaid),
            plan_id: r.plan_id,
        }
    }
}
