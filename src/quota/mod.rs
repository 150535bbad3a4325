//! Per-tier generation limits.

pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use repo::{SubscriptionLookup, UsageStore};
pub use services::{PlanTier, QuotaCheck, QuotaReason};

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::usage_routes())
}
