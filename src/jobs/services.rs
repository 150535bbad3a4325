use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dto::JobAccepted;
use super::repo_types::{GenerationJob, JobStatus};
use super::worker::Work;
use crate::{
    error::AppError,
    planner::{self, prompt::build_prompt, GenerationError, MealPlanResult, ParseError, PlanRequest},
    quota,
    state::AppState,
};

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";
pub const STALE_MESSAGE: &str = "Meal plan generation timed out, please try again";
const SAVE_FAILED_MESSAGE: &str = "The meal plan was generated but could not be saved";

const MAX_DAYS: u32 = 14;
const MAX_MEALS_PER_DAY: u32 = 6;
const MAX_PEOPLE: u32 = 20;
const CALORIE_RANGE: (u32, u32) = (800, 6000);
const MAX_INVENTORY_ITEMS: usize = 100;
pub const MAX_RECENT: i64 = 20;

/// Anything that can go wrong between claim and result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub fn validate(req: &PlanRequest) -> Result<(), AppError> {
    let bad = |msg: String| -> Result<(), AppError> { Err(AppError::Validation(msg)) };
    if !(1..=MAX_DAYS).contains(&req.days) {
        return bad(format!("days must be between 1 and {MAX_DAYS}"));
    }
    if !(1..=MAX_MEALS_PER_DAY).contains(&req.meals_per_day) {
        return bad(format!("mealsPerDay must be between 1 and {MAX_MEALS_PER_DAY}"));
    }
    if !(1..=MAX_PEOPLE).contains(&req.people) {
        return bad(format!("people must be between 1 and {MAX_PEOPLE}"));
    }
    let (lo, hi) = CALORIE_RANGE;
    if !(lo..=hi).contains(&req.target_calories) {
        return bad(format!("targetCalories must be between {lo} and {hi}"));
    }
    if req.inventory.len() > MAX_INVENTORY_ITEMS {
        return bad(format!("inventory may list at most {MAX_INVENTORY_ITEMS} items"));
    }
    if req.inventory.iter().any(|i| i.name.trim().is_empty()) {
        return bad("inventory item names must not be empty".into());
    }
    let mut labels = req
        .restrictions
        .iter()
        .chain(&req.allergies)
        .chain(&req.cuisine_preferences);
    if labels.any(|s| s.trim().is_empty()) {
        return bad("restrictions, allergies and cuisines must not contain empty values".into());
    }
    Ok(())
}

/// Validate, gate on quota, persist a pending job and fire the automatic
/// trigger. Returns as soon as the job is stored.
#[instrument(skip(st, req))]
pub async fn create_job(
    st: &AppState,
    user_id: Uuid,
    req: PlanRequest,
) -> Result<JobAccepted, AppError> {
    validate(&req)?;
    quota::services::ensure_allowed(st, user_id).await?;

    let job = GenerationJob::new(user_id, req);
    st.jobs.insert(&job).await?;
    info!(job_id = %job.id, %user_id, days = job.params.days, meals = job.params.meals_per_day, "generation job created");

    if st.queue.submit(Work::Claim(job.id)).is_err() {
        warn!(job_id = %job.id, "automatic trigger dropped; job stays pending until processed manually");
    }

    Ok(JobAccepted {
        job_id: job.id,
        status: JobStatus::Pending,
    })
}

/// Load a job on behalf of `user_id`.
pub async fn load_owned(st: &AppState, user_id: Uuid, job_id: Uuid) -> Result<GenerationJob, AppError> {
    let job = st
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    if job.user_id != user_id {
        warn!(%job_id, %user_id, "job owned by another user");
        return Err(AppError::Forbidden("Job belongs to another user".into()));
    }
    Ok(job)
}

/// Manual trigger. Claims the named job, or the caller's oldest pending job,
/// and queues it for execution. `Ok(None)` when there is nothing to claim.
#[instrument(skip(st))]
pub async fn trigger_processing(
    st: &AppState,
    user_id: Uuid,
    job_id: Option<Uuid>,
) -> Result<Option<GenerationJob>, AppError> {
    let now = OffsetDateTime::now_utc();
    let claimed = match job_id {
        Some(id) => {
            load_owned(st, user_id, id).await?;
            let claimed = st.jobs.claim(id, now).await?;
            if claimed.is_none() {
                debug!(job_id = %id, "manual trigger lost the claim");
                return Err(AppError::Conflict("Job is already being processed or finished".into()));
            }
            claimed
        }
        None => st.jobs.claim_oldest_pending(Some(user_id), now).await?,
    };

    let Some(job) = claimed else {
        return Ok(None);
    };
    info!(job_id = %job.id, "job claimed by manual trigger");
    if let Err(Work::Execute(job)) = st.queue.submit(Work::Execute(Box::new(job.clone()))) {
        // Already claimed: it must run somewhere or it would sit in processing.
        let st = st.clone();
        tokio::spawn(async move { execute(&st, *job).await });
    }
    Ok(Some(job))
}

/// Worker entry point for the automatic trigger. A lost claim means another
/// caller owns the job and this call does nothing.
#[instrument(skip(st))]
pub async fn claim_and_process(st: &AppState, job_id: Uuid) {
    match st.jobs.claim(job_id, OffsetDateTime::now_utc()).await {
        Ok(Some(job)) => execute(st, job).await,
        Ok(None) => debug!(%job_id, "job already claimed or not pending"),
        Err(e) => error!(error = %e, %job_id, "claim failed"),
    }
}

/// Run a claimed job to a terminal state.
#[instrument(skip(st, job), fields(job_id = %job.id, user_id = %job.user_id))]
pub async fn execute(st: &AppState, job: GenerationJob) {
    let started = Instant::now();
    match generate(st, &job.params).await {
        Ok(result) => match st.jobs.complete(job.id, &result, OffsetDateTime::now_utc()).await {
            Ok(true) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "generation job completed");
                if let Err(e) = quota::services::increment_generation_count(st, job.user_id).await {
                    error!(error = %e, "quota increment failed after successful generation");
                }
            }
            Ok(false) => warn!("job left processing before completion; result discarded"),
            Err(e) => {
                error!(error = %e, "saving result failed");
                mark_failed(st, job.id, SAVE_FAILED_MESSAGE).await;
            }
        },
        Err(e) => {
            warn!(error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "generation job failed");
            mark_failed(st, job.id, &e.to_string()).await;
        }
    }
}

async fn generate(st: &AppState, params: &PlanRequest) -> Result<MealPlanResult, PipelineError> {
    let prompt = build_prompt(params);
    let budget = st.config.generation.timeout();
    let raw = tokio::time::timeout(budget, st.generator.generate(&prompt))
        .await
        .map_err(|_| GenerationError::Timeout(budget))??;
    Ok(planner::assemble_plan(params, &raw)?)
}

async fn mark_failed(st: &AppState, job_id: Uuid, message: &str) {
    match st.jobs.fail(job_id, message, OffsetDateTime::now_utc()).await {
        Ok(true) => {}
        Ok(false) => debug!(%job_id, "job already terminal; failure not recorded"),
        Err(e) => error!(error = %e, %job_id, "could not record job failure"),
    }
}

/// Advisory cancellation. The generation call itself is not interrupted,
/// but its result can no longer be stored.
#[instrument(skip(st))]
pub async fn cancel_job(st: &AppState, user_id: Uuid, job_id: Uuid) -> Result<(), AppError> {
    load_owned(st, user_id, job_id).await?;
    if st
        .jobs
        .cancel(job_id, CANCELLED_MESSAGE, OffsetDateTime::now_utc())
        .await?
    {
        info!(%job_id, "job cancelled");
        Ok(())
    } else {
        Err(AppError::Conflict("Job has already finished".into()))
    }
}

pub async fn recent_jobs(
    st: &AppState,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<GenerationJob>, AppError> {
    let jobs = st
        .jobs
        .list_recent(user_id, limit.clamp(1, MAX_RECENT))
        .await
        .context("list recent jobs")?;
    Ok(jobs)
}

pub async fn fail_stale_jobs(st: &AppState, started_before: OffsetDateTime) -> anyhow::Result<usize> {
    let ids = st
        .jobs
        .fail_stale(started_before, STALE_MESSAGE, OffsetDateTime::now_utc())
        .await?;
    for id in &ids {
        warn!(job_id = %id, "stale job marked failed");
    }
    Ok(ids.len())
}
