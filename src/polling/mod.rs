//! Client side of job status polling.
//!
//! A caller polls a job at a fixed interval until it reaches a terminal
//! state. Transport hiccups are retried within the attempt budget, an
//! explicit `failed` status ends polling at once, and exhausting the budget
//! leaves the job alone so it can be picked up later from the recent list.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jobs::dto::JobStatusResponse;
use crate::jobs::JobStatus;
use crate::planner::MealPlanResult;

pub use http::HttpStatusClient;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 60,
        }
    }
}

/// Failure talking to the job service.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network trouble or a server-side error; worth another try.
    #[error("transient error: {0}")]
    Transient(String),

    /// The service refused the request (auth, ownership, missing job).
    #[error("request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Failed(String),

    #[error("meal plan generation is taking longer than expected; check your recent plans later")]
    TimedOut { job_id: Uuid, attempts: u32 },

    #[error("polling cancelled")]
    Cancelled,

    #[error("request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Where job status comes from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, job_id: Uuid) -> Result<JobStatusResponse, SourceError>;

    /// Advisory: the server may already be past the point of no return.
    async fn cancel(&self, job_id: Uuid) -> Result<(), SourceError>;

    /// Newest jobs first.
    async fn recent(&self, limit: u32) -> Result<Vec<JobStatusResponse>, SourceError>;
}

/// Stops a running poll loop.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    async fn cancelled(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

/// Poll `job_id` until it completes, fails, is cancelled or the attempt
/// budget runs out.
pub async fn poll_until_terminal<S>(
    source: &S,
    job_id: Uuid,
    config: &PollConfig,
    mut cancel: CancelToken,
) -> Result<MealPlanResult, PollError>
where
    S: StatusSource + ?Sized,
{
    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(abandon(source, job_id).await);
        }
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = cancel.cancelled() => return Err(abandon(source, job_id).await),
        }

        match source.status(job_id).await {
            Ok(s) => match s.status {
                JobStatus::Completed => {
                    info!(%job_id, attempt, "meal plan ready");
                    return s
                        .result
                        .ok_or_else(|| PollError::Failed("Job completed without a result".into()));
                }
                JobStatus::Failed => {
                    let message = s
                        .error
                        .unwrap_or_else(|| "Meal plan generation failed".into());
                    warn!(%job_id, attempt, error = %message, "job failed");
                    return Err(PollError::Failed(message));
                }
                JobStatus::Pending | JobStatus::Processing => {
                    debug!(%job_id, attempt, status = ?s.status, "job not finished");
                }
            },
            Err(SourceError::Transient(e)) => {
                debug!(%job_id, attempt, error = %e, "status check failed; retrying");
            }
            Err(SourceError::Rejected { status, message }) => {
                warn!(%job_id, status, "status check rejected");
                return Err(PollError::Rejected { status, message });
            }
        }
    }

    warn!(%job_id, attempts = config.max_attempts, "gave up polling");
    Err(PollError::TimedOut {
        job_id,
        attempts: config.max_attempts,
    })
}

async fn abandon<S: StatusSource + ?Sized>(source: &S, job_id: Uuid) -> PollError {
    if let Err(e) = source.cancel(job_id).await {
        debug!(%job_id, error = %e, "cancel request not delivered");
    }
    info!(%job_id, "polling cancelled");
    PollError::Cancelled
}

/// Look for a finished plan among the caller's recent jobs, for use after a
/// polling timeout.
pub async fn recover_from_recent<S>(
    source: &S,
    job_id: Uuid,
    limit: u32,
) -> Result<Option<MealPlanResult>, SourceError>
where
    S: StatusSource + ?Sized,
{
    let recent = source.recent(limit).await?;
    Ok(recent
        .into_iter()
        .find(|j| j.job_id == job_id && j.status == JobStatus::Completed)
        .and_then(|j| j.result))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use time::OffsetDateTime;
    use tokio::sync::Mutex;

    use super::*;
    use crate::planner::{assemble_plan, parser::tests::plan_json};
    use crate::jobs::services::tests::request;

    struct ScriptedSource {
        replies: Mutex<VecDeque<Result<JobStatusResponse, SourceError>>>,
        calls: AtomicU32,
        cancelled: AtomicBool,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<JobStatusResponse, SourceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                cancelled: AtomicBool::new(false),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn status(&self, job_id: Uuid) -> Result<JobStatusResponse, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(reply(job_id, JobStatus::Processing)))
        }

        async fn cancel(&self, _job_id: Uuid) -> Result<(), SourceError> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn recent(&self, _limit: u32) -> Result<Vec<JobStatusResponse>, SourceError> {
            let mut done = reply(JOB, JobStatus::Completed);
            done.result = Some(plan());
            Ok(vec![reply(Uuid::new_v4(), JobStatus::Pending), done])
        }
    }

    const JOB: Uuid = Uuid::from_u128(7);

    fn plan() -> MealPlanResult {
        assemble_plan(&request(1, 1), &plan_json(1, 1)).unwrap()
    }

    fn reply(job_id: Uuid, status: JobStatus) -> JobStatusResponse {
        JobStatusResponse {
            job_id,
            status,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn failed(message: &str) -> JobStatusResponse {
        let mut r = reply(JOB, JobStatus::Failed);
        r.error = Some(message.into());
        r
    }

    fn completed() -> JobStatusResponse {
        let mut r = reply(JOB, JobStatus::Completed);
        r.result = Some(plan());
        r
    }

    #[tokio::test(start_paused = true)]
    async fn failed_on_first_poll_stops_immediately() {
        let source = ScriptedSource::new(vec![Ok(failed("rate limited upstream"))]);
        let (_h, token) = cancel_pair();

        let err = poll_until_terminal(&source, JOB, &PollConfig::default(), token)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Failed(ref m) if m == "rate limited upstream"));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_completion() {
        let source = ScriptedSource::new(vec![
            Err(SourceError::Transient("connection reset".into())),
            Ok(reply(JOB, JobStatus::Pending)),
            Err(SourceError::Transient("502".into())),
            Ok(reply(JOB, JobStatus::Processing)),
            Ok(completed()),
        ]);
        let (_h, token) = cancel_pair();

        let result = poll_until_terminal(&source, JOB, &PollConfig::default(), token)
            .await
            .unwrap();

        assert_eq!(result.daily_plans.len(), 1);
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_times_out_without_cancelling() {
        let source = ScriptedSource::new(vec![]);
        let (_h, token) = cancel_pair();
        let started = tokio::time::Instant::now();

        let err = poll_until_terminal(&source, JOB, &PollConfig::default(), token)
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::TimedOut { attempts: 60, .. }));
        assert_eq!(source.calls(), 60);
        assert!(!source.cancelled.load(Ordering::SeqCst));
        assert!(started.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_fatal() {
        let source = ScriptedSource::new(vec![Err(SourceError::Rejected {
            status: 404,
            message: "Job not found".into(),
        })]);
        let (_h, token) = cancel_pair();

        let err = poll_until_terminal(&source, JOB, &PollConfig::default(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Rejected { status: 404, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_and_signals_server() {
        let source = ScriptedSource::new(vec![]);
        let (handle, token) = cancel_pair();
        let config = PollConfig::default();

        let poll = poll_until_terminal(&source, JOB, &config, token);
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(7)).await;
            handle.cancel();
        };
        let (res, _) = tokio::join!(poll, cancel);

        assert!(matches!(res, Err(PollError::Cancelled)));
        assert_eq!(source.calls(), 2);
        assert!(source.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn recovery_finds_completed_job() {
        let source = ScriptedSource::new(vec![]);
        let found = recover_from_recent(&source, JOB, 5).await.unwrap();
        assert!(found.is_some());
        let missing = recover_from_recent(&source, Uuid::new_v4(), 5).await.unwrap();
        assert!(missing.is_none());
    }
}
