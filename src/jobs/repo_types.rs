use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::planner::{MealPlanResult, PlanRequest};

/// Lifecycle of a generation job: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: JobStatus,
    pub params: PlanRequest,
    pub result: Option<MealPlanResult>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub processing_started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

impl GenerationJob {
    pub fn new(user_id: Uuid, params: PlanRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: JobStatus::Pending,
            params,
            result: None,
            error: None,
            created_at: OffsetDateTime::now_utc(),
            processing_started_at: None,
            completed_at: None,
        }
    }
}

/// `generation_jobs` row as stored in Postgres.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: JobStatus,
    pub params: Json<PlanRequest>,
    pub result: Option<Json<MealPlanResult>>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub processing_started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

impl From<JobRow> for GenerationJob {
    fn from(r: JobRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            status: r.status,
            params: r.params.0,
            result: r.result.map(|j| j.0),
            error: r.error,
            created_at: r.created_at,
            processing_started_at: r.processing_started_at,
            completed_at: r.completed_at,
        }
    }
}
