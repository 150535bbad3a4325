use serde::Serialize;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime, Time};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::repo_types::{Subscription, SubscriptionStatus, UsageRecord};
use crate::{error::AppError, state::AppState};

pub const PERIOD_DAYS: i64 = 30;
pub const FREE_PERIOD_LIMIT: u32 = 5;
pub const BASIC_DAILY_LIMIT: u32 = 50;
pub const ULTRA_DAILY_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Ultra,
}

impl PlanTier {
    /// Tier from billing state. Lapsed, canceled or missing subscriptions
    /// fall back to the free tier.
    pub fn resolve(subscription: Option<&Subscription>) -> Self {
        let Some(sub) = subscription else {
            return PlanTier::Free;
        };
        match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue => {}
            _ => return PlanTier::Free,
        }
        let plan = sub.plan_id.as_deref().unwrap_or_default().to_lowercase();
        if plan.contains("ultra") {
            PlanTier::Ultra
        } else if plan.contains("basic") {
            PlanTier::Basic
        } else {
            PlanTier::Free
        }
    }

    /// Limit per rolling 30-day period, if the tier has one.
    pub fn period_limit(&self) -> Option<u32> {
        match self {
            PlanTier::Free => Some(FREE_PERIOD_LIMIT),
            PlanTier::Basic | PlanTier::Ultra => None,
        }
    }

    /// Limit per calendar day (UTC), if the tier has one.
    pub fn daily_limit(&self) -> Option<u32> {
        match self {
            PlanTier::Free => None,
            PlanTier::Basic => Some(BASIC_DAILY_LIMIT),
            PlanTier::Ultra => Some(ULTRA_DAILY_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaReason {
    PeriodResetNeeded,
    MonthlyLimit,
    DailyLimit,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<QuotaReason>,
    pub current_usage: u32,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub plan_tier: PlanTier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resets_at: Option<OffsetDateTime>,
}

impl QuotaCheck {
    pub fn limit_code(&self) -> &'static str {
        match self.reason {
            Some(QuotaReason::DailyLimit) => "DAILY_LIMIT_REACHED",
            _ => "MONTHLY_LIMIT_REACHED",
        }
    }

    pub fn message(&self) -> String {
        match (self.reason, self.limit) {
            (Some(QuotaReason::DailyLimit), Some(limit)) => {
                format!("Daily limit of {limit} meal plans reached")
            }
            (_, Some(limit)) => format!("Limit of {limit} meal plans per {PERIOD_DAYS} days reached"),
            _ => "Generation limit reached".to_string(),
        }
    }

    pub fn resets_at_rfc3339(&self) -> Option<String> {
        self.resets_at.and_then(|t| t.format(&Rfc3339).ok())
    }

    fn open(tier: PlanTier) -> Self {
        Self {
            allowed: true,
            reason: None,
            current_usage: 0,
            limit: tier.period_limit().or(tier.daily_limit()),
            remaining: None,
            plan_tier: tier,
            resets_at: None,
        }
    }
}

fn next_midnight(now: OffsetDateTime) -> OffsetDateTime {
    (now + Duration::days(1)).replace_time(Time::MIDNIGHT)
}

/// Decide whether a new generation may start. Pure; performs no writes.
pub fn evaluate(usage: Option<&UsageRecord>, tier: PlanTier, now: OffsetDateTime) -> QuotaCheck {
    if let Some(limit) = tier.period_limit() {
        let Some(rec) = usage else {
            return QuotaCheck {
                remaining: Some(limit),
                ..QuotaCheck::open(tier)
            };
        };
        if now - rec.period_start >= Duration::days(PERIOD_DAYS) {
            return QuotaCheck {
                reason: Some(QuotaReason::PeriodResetNeeded),
                remaining: Some(limit),
                resets_at: Some(now + Duration::days(PERIOD_DAYS)),
                ..QuotaCheck::open(tier)
            };
        }
        let used = rec.period_used.max(0) as u32;
        let resets_at = Some(rec.period_start + Duration::days(PERIOD_DAYS));
        return QuotaCheck {
            allowed: used < limit,
            reason: (used >= limit).then_some(QuotaReason::MonthlyLimit),
            current_usage: used,
            limit: Some(limit),
            remaining: Some(limit.saturating_sub(used)),
            plan_tier: tier,
            resets_at,
        };
    }

    if let Some(cap) = tier.daily_limit() {
        let used = usage
            .filter(|rec| rec.daily_date == now.date())
            .map(|rec| rec.daily_used.max(0) as u32)
            .unwrap_or(0);
        return QuotaCheck {
            allowed: used < cap,
            reason: (used >= cap).then_some(QuotaReason::DailyLimit),
            current_usage: used,
            limit: Some(cap),
            remaining: Some(cap.saturating_sub(used)),
            plan_tier: tier,
            resets_at: Some(next_midnight(now)),
        };
    }

    QuotaCheck::open(tier)
}

/// Quota decision for a user. Fails open when billing or usage data cannot
/// be read.
#[instrument(skip(st))]
pub async fn check_allowed(st: &AppState, user_id: Uuid) -> QuotaCheck {
    let now = OffsetDateTime::now_utc();
    let tier = match st.subscriptions.subscription(user_id).await {
        Ok(sub) => PlanTier::resolve(sub.as_ref()),
        Err(e) => {
            error!(error = %e, %user_id, "subscription lookup failed; allowing generation");
            return QuotaCheck::open(PlanTier::Free);
        }
    };
    match st.usage.get(user_id).await {
        Ok(usage) => evaluate(usage.as_ref(), tier, now),
        Err(e) => {
            error!(error = %e, %user_id, "usage lookup failed; allowing generation");
            QuotaCheck::open(tier)
        }
    }
}

/// Gate used before creating a job: performs any pending period reset and
/// rejects when the user is over their limit.
#[instrument(skip(st))]
pub async fn ensure_allowed(st: &AppState, user_id: Uuid) -> Result<QuotaCheck, AppError> {
    let check = check_allowed(st, user_id).await;
    if check.reason == Some(QuotaReason::PeriodResetNeeded) {
        if let Err(e) = st.usage.reset_period(user_id, OffsetDateTime::now_utc()).await {
            warn!(error = %e, %user_id, "usage period reset failed");
        } else {
            info!(%user_id, "usage period reset");
        }
    }
    if !check.allowed {
        warn!(%user_id, reason = ?check.reason, usage = check.current_usage, "generation quota exceeded");
        return Err(AppError::QuotaExceeded(check));
    }
    Ok(check)
}

/// Count a delivered plan against the user's quota.
#[instrument(skip(st))]
pub async fn increment_generation_count(st: &AppState, user_id: Uuid) -> anyhow::Result<()> {
    st.usage.increment(user_id, OffsetDateTime::now_utc()).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::quota::repo::{MemorySubscriptions, MemoryUsageStore, SubscriptionLookup, UsageStore};
    use std::sync::Arc;
    use time::macros::datetime;

    fn usage(period_used: i32, period_start: OffsetDateTime) -> UsageRecord {
        UsageRecord {
            user_id: Uuid::nil(),
            period_used,
            period_start,
            daily_used: period_used,
            daily_date: period_start.date(),
            lifetime_total: period_used as i64,
        }
    }

    fn sub(status: SubscriptionStatus, plan: &str) -> Subscription {
        Subscription { status, plan_id: Some(plan.into()) }
    }

    #[test]
    fn resolves_tiers() {
        assert_eq!(PlanTier::resolve(None), PlanTier::Free);
        assert_eq!(
            PlanTier::resolve(Some(&sub(SubscriptionStatus::Active, "price_basic_monthly"))),
            PlanTier::Basic
        );
        assert_eq!(
            PlanTier::resolve(Some(&sub(SubscriptionStatus::Trialing, "ULTRA"))),
            PlanTier::Ultra
        );
        assert_eq!(
            PlanTier::resolve(Some(&sub(SubscriptionStatus::Canceled, "ultra"))),
            PlanTier::Free
        );
        assert_eq!(
            PlanTier::resolve(Some(&sub(SubscriptionStatus::Active, "mystery"))),
            PlanTier::Free
        );
    }

    #[test]
    fn free_user_at_limit_is_rejected() {
        let now = datetime!(2026-05-20 10:00 UTC);
        let rec = usage(5, now - Duration::days(3));
        let check = evaluate(Some(&rec), PlanTier::Free, now);
        assert!(!check.allowed);
        assert_eq!(check.reason, Some(QuotaReason::MonthlyLimit));
        assert_eq!(check.current_usage, 5);
        assert_eq!(check.limit, Some(5));
        assert_eq!(check.remaining, Some(0));
        assert_eq!(check.resets_at, Some(now + Duration::days(27)));
        assert_eq!(check.limit_code(), "MONTHLY_LIMIT_REACHED");
    }

    #[test]
    fn elapsed_period_signals_reset_before_rejecting() {
        let now = datetime!(2026-05-20 10:00 UTC);
        let rec = usage(5, now - Duration::days(31));
        let check = evaluate(Some(&rec), PlanTier::Free, now);
        assert!(check.allowed);
        assert_eq!(check.reason, Some(QuotaReason::PeriodResetNeeded));

        let exactly = usage(5, now - Duration::days(30));
        let check = evaluate(Some(&exactly), PlanTier::Free, now);
        assert_eq!(check.reason, Some(QuotaReason::PeriodResetNeeded));
    }

    #[test]
    fn free_user_under_limit_is_allowed() {
        let now = datetime!(2026-05-20 10:00 UTC);
        let check = evaluate(Some(&usage(2, now)), PlanTier::Free, now);
        assert!(check.allowed);
        assert_eq!(check.reason, None);
        assert_eq!(check.remaining, Some(3));
        let fresh = evaluate(None, PlanTier::Free, now);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, Some(5));
    }

    #[test]
    fn paid_tiers_use_daily_cap_only() {
        let now = datetime!(2026-05-20 10:00 UTC);
        let mut rec = usage(500, now - Duration::days(90));
        rec.daily_used = 50;
        rec.daily_date = now.date();
        let check = evaluate(Some(&rec), PlanTier::Basic, now);
        assert!(!check.allowed);
        assert_eq!(check.reason, Some(QuotaReason::DailyLimit));
        assert_eq!(check.limit_code(), "DAILY_LIMIT_REACHED");
        assert_eq!(check.resets_at, Some(datetime!(2026-05-21 00:00 UTC)));

        let ultra = evaluate(Some(&rec), PlanTier::Ultra, now);
        assert!(ultra.allowed);
        assert_eq!(ultra.remaining, Some(50));

        rec.daily_date = now.date().previous_day().unwrap();
        let next_day = evaluate(Some(&rec), PlanTier::Basic, now);
        assert!(next_day.allowed);
        assert_eq!(next_day.current_usage, 0);
    }

    #[tokio::test]
    async fn ensure_allowed_resets_elapsed_period() {
        let usage_store = Arc::new(MemoryUsageStore::new());
        let (mut st, _rx) = AppState::fake();
        st.usage = usage_store.clone();
        let user = Uuid::new_v4();
        let old = OffsetDateTime::now_utc() - Duration::days(40);
        usage_store
            .put(UsageRecord { user_id: user, ..usage(5, old) })
            .await;

        let check = ensure_allowed(&st, user).await.expect("allowed after reset");
        assert_eq!(check.reason, Some(QuotaReason::PeriodResetNeeded));
        let rec = usage_store.get(user).await.unwrap().unwrap();
        assert_eq!(rec.period_used, 0);
    }

    #[tokio::test]
    async fn ensure_allowed_rejects_exhausted_user() {
        let usage_store = Arc::new(MemoryUsageStore::new());
        let (mut st, _rx) = AppState::fake();
        st.usage = usage_store.clone();
        let user = Uuid::new_v4();
        for _ in 0..FREE_PERIOD_LIMIT {
            usage_store.increment(user, OffsetDateTime::now_utc()).await.unwrap();
        }
        let err = ensure_allowed(&st, user).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn paid_subscription_lifts_period_limit() {
        let usage_store = Arc::new(MemoryUsageStore::new());
        let subs = Arc::new(MemorySubscriptions::new());
        let (mut st, _rx) = AppState::fake();
        st.usage = usage_store.clone();
        st.subscriptions = subs.clone();
        let user = Uuid::new_v4();
        for _ in 0..10 {
            usage_store.increment(user, OffsetDateTime::now_utc()).await.unwrap();
        }
        subs.set(user, sub(SubscriptionStatus::Active, "basic")).await;
        let check = check_allowed(&st, user).await;
        assert!(check.allowed);
        assert_eq!(check.plan_tier, PlanTier::Basic);
        assert_eq!(check.current_usage, 10);
    }

    pub(crate) struct BrokenUsage;

    #[async_trait::async_trait]
    impl UsageStore for BrokenUsage {
        async fn get(&self, _u: Uuid) -> anyhow::Result<Option<UsageRecord>> {
            anyhow::bail!("connection refused")
        }
        async fn reset_period(&self, _u: Uuid, _n: OffsetDateTime) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn increment(&self, _u: Uuid, _n: OffsetDateTime) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn unreadable_usage_fails_open() {
        let (mut st, _rx) = AppState::fake();
        st.usage = Arc::new(BrokenUsage);
        let check = check_allowed(&st, Uuid::new_v4()).await;
        assert!(check.allowed);
        assert!(ensure_allowed(&st, Uuid::new_v4()).await.is_ok());
    }

    struct BrokenBilling;

    #[async_trait::async_trait]
    impl SubscriptionLookup for BrokenBilling {
        async fn subscription(&self, _u: Uuid) -> anyhow::Result<Option<Subscription>> {
            anyhow::bail!("billing unavailable")
        }
    }

    #[tokio::test]
    async fn unreadable_subscription_fails_open() {
        let (mut st, _rx) = AppState::fake();
        st.subscriptions = Arc::new(BrokenBilling);
        let user = Uuid::new_v4();
        let check = check_allowed(&st, user).await;
        assert!(check.allowed);
        assert_eq!(check.plan_tier, PlanTier::Free);
        assert!(ensure_allowed(&st, user).await.is_ok());
    }
}
