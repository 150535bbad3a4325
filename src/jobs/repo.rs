use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo_types::{GenerationJob, JobRow, JobStatus};
use crate::planner::MealPlanResult;

/// Durable job records.
///
/// Every status change is a conditional write on the current status, so two
/// callers racing for the same transition cannot both succeed. Methods that
/// return `bool` report whether the transition happened.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &GenerationJob) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<GenerationJob>>;

    /// `pending → processing`. `None` when the job is missing or not pending.
    async fn claim(&self, id: Uuid, now: OffsetDateTime) -> anyhow::Result<Option<GenerationJob>>;

    /// Claim the oldest pending job, optionally restricted to one owner.
    async fn claim_oldest_pending(
        &self,
        user_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<GenerationJob>>;

    /// `processing → completed`.
    async fn complete(
        &self,
        id: Uuid,
        result: &MealPlanResult,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    /// `processing → failed`.
    async fn fail(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool>;

    /// `pending | processing → failed`, on user request.
    async fn cancel(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool>;

    /// Fail every job that entered `processing` before `started_before`.
    async fn fail_stale(
        &self,
        started_before: OffsetDateTime,
        error: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<Uuid>>;

    /// Newest first.
    async fn list_recent(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<GenerationJob>>;
}

// ---- Postgres ----

const JOB_COLUMNS: &str = "id, user_id, status, params, result, error, created_at, processing_started_at, completed_at";

#[derive(Clone)]
pub struct PgJobStore {
    db: PgPool,
}

impl PgJobStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &GenerationJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (id, user_id, status, params, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(job.status)
        .bind(Json(&job.params))
        .bind(job.created_at)
        .execute(&self.db)
        .await
        .context("insert generation job")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<GenerationJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get generation job")?;
        Ok(row.map(GenerationJob::from))
    }

    async fn claim(&self, id: Uuid, now: OffsetDateTime) -> anyhow::Result<Option<GenerationJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE generation_jobs
               SET status = 'processing', processing_started_at = $2
             WHERE id = $1 AND status = 'pending'
         RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("claim generation job")?;
        Ok(row.map(GenerationJob::from))
    }

    async fn claim_oldest_pending(
        &self,
        user_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<GenerationJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE generation_jobs
               SET status = 'processing', processing_started_at = $2
             WHERE status = 'pending'
               AND id = (
                   SELECT id
                     FROM generation_jobs
                    WHERE status = 'pending'
                      AND ($1::uuid IS NULL OR user_id = $1)
                    ORDER BY created_at ASC
                    LIMIT 1
                      FOR UPDATE SKIP LOCKED
               )
         RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("claim oldest pending job")?;
        Ok(row.map(GenerationJob::from))
    }

    async fn complete(
        &self,
        id: Uuid,
        result: &MealPlanResult,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'completed', result = $2, completed_at = $3
             WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(Json(result))
        .bind(now)
        .execute(&self.db)
        .await
        .context("complete generation job")?;
        Ok(done.rows_affected() == 1)
    }

    async fn fail(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'failed', error = $2, completed_at = $3
             WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.db)
        .await
        .context("fail generation job")?;
        Ok(done.rows_affected() == 1)
    }

    async fn cancel(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'failed', error = $2, completed_at = $3
             WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.db)
        .await
        .context("cancel generation job")?;
        Ok(done.rows_affected() == 1)
    }

    async fn fail_stale(
        &self,
        started_before: OffsetDateTime,
        error: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE generation_jobs
               SET status = 'failed', error = $2, completed_at = $3
             WHERE status = 'processing' AND processing_started_at < $1
         RETURNING id
            "#,
        )
        .bind(started_before)
        .bind(error)
        .bind(now)
        .fetch_all(&self.db)
        .await
        .context("fail stale generation jobs")?;
        Ok(ids)
    }

    async fn list_recent(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<GenerationJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
              FROM generation_jobs
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("list recent generation jobs")?;
        Ok(rows.into_iter().map(GenerationJob::from).collect())
    }
}

// ---- In-memory ----

/// Process-local store for tests and single-node development runs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, GenerationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        job: &mut GenerationJob,
        to: JobStatus,
        error: Option<&str>,
        result: Option<&MealPlanResult>,
        now: OffsetDateTime,
    ) {
        job.status = to;
        match to {
            JobStatus::Processing => job.processing_started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => {
                job.completed_at = Some(now);
                job.error = error.map(str::to_string);
                job.result = result.cloned();
            }
            JobStatus::Pending => {}
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &GenerationJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        anyhow::ensure!(!jobs.contains_key(&job.id), "duplicate job id {}", job.id);
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<GenerationJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid, now: OffsetDateTime) -> anyhow::Result<Option<GenerationJob>> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                Self::transition(job, JobStatus::Processing, None, None, now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_oldest_pending(
        &self,
        user_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<GenerationJob>> {
        let mut jobs = self.jobs.lock().await;
        let oldest = jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| user_id.map_or(true, |u| j.user_id == u))
            .min_by_key(|j| (j.created_at, j.id));
        Ok(oldest.map(|job| {
            Self::transition(job, JobStatus::Processing, None, None, now);
            job.clone()
        }))
    }

    async fn complete(
        &self,
        id: Uuid,
        result: &MealPlanResult,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                Self::transition(job, JobStatus::Completed, None, Some(result), now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                Self::transition(job, JobStatus::Failed, Some(error), None, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, id: Uuid, error: &str, now: OffsetDateTime) -> anyhow::Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                Self::transition(job, JobStatus::Failed, Some(error), None, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_stale(
        &self,
        started_before: OffsetDateTime,
        error: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<Uuid>> {
        let mut jobs = self.jobs.lock().await;
        let mut failed = Vec::new();
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.processing_started_at.map_or(false, |t| t < started_before);
            if stale {
                Self::transition(job, JobStatus::Failed, Some(error), None, now);
                failed.push(job.id);
            }
        }
        Ok(failed)
    }

    async fn list_recent(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<GenerationJob>> {
        let jobs = self.jobs.lock().await;
        let mut mine: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit.max(0) as usize);
        Ok(mine)
    }
}
