//! Asynchronous meal-plan generation jobs: creation, status polling, the
//! manual trigger, cancellation and the worker pool that runs them.

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod worker;

use crate::state::AppState;
use axum::Router;

pub use repo::JobStore;
pub use repo_types::{GenerationJob, JobStatus};
pub use worker::{spawn_sweeper, spawn_workers, JobQueue, Work, WorkReceiver};

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::job_routes())
}
