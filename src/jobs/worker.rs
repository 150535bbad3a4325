use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::repo_types::GenerationJob;
use super::services;
use crate::state::AppState;

/// A unit of work for the pool.
#[derive(Debug)]
pub enum Work {
    /// Claim the job, then run it. Used right after creation.
    Claim(Uuid),
    /// Run a job that a manual trigger already claimed.
    Execute(Box<GenerationJob>),
}

/// Producer side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Work>,
}

pub type WorkReceiver = mpsc::Receiver<Work>;

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, WorkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Hands the work back when the queue is full
    /// or no worker is listening.
    pub fn submit(&self, work: Work) -> Result<(), Work> {
        self.tx.try_send(work).map_err(|e| match e {
            mpsc::error::TrySendError::Full(w) => {
                warn!("job queue full");
                w
            }
            mpsc::error::TrySendError::Closed(w) => {
                warn!("job queue closed");
                w
            }
        })
    }
}

/// Start `count` workers sharing one receiver.
pub fn spawn_workers(st: AppState, rx: WorkReceiver, count: usize) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let st = st.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                debug!(worker, "job worker started");
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(work) = next else { break };
                    handle(&st, work).await;
                }
                debug!(worker, "job worker stopped");
            })
        })
        .collect()
}

async fn handle(st: &AppState, work: Work) {
    match work {
        Work::Claim(job_id) => services::claim_and_process(st, job_id).await,
        Work::Execute(job) => services::execute(st, *job).await,
    }
}

/// Periodically fail jobs stuck in `processing` beyond the configured age.
pub fn spawn_sweeper(st: AppState) -> JoinHandle<()> {
    let every = Duration::from_secs(st.config.workers.sweep_interval_secs);
    let max_age = time::Duration::seconds(st.config.workers.stale_after_secs as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = OffsetDateTime::now_utc() - max_age;
            match services::fail_stale_jobs(&st, cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "failed stale generation jobs"),
                Err(e) => error!(error = %e, "stale job sweep failed"),
            }
        }
    })
}
