use axum::{extract::State, routing::get, Json, Router};
use tracing::instrument;

use super::services::{check_allowed, QuotaCheck};
use crate::{auth::AuthUser, state::AppState};

pub fn usage_routes() -> Router<AppState> {
    Router::new().route("/usage", get(get_usage))
}

/// Current quota standing of the caller. Read-only: a pending period reset
/// is reported but not applied.
#[instrument(skip(state))]
pub async fn get_usage(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Json<QuotaCheck> {
    Json(check_allowed(&state, user_id).await)
}
