use std::sync::Arc;

use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::jobs::repo::{JobStore, MemoryJobStore, PgJobStore};
use crate::jobs::worker::{JobQueue, WorkReceiver};
use crate::planner::{HttpTextGenerator, ScriptedGenerator, TextGenerator};
use crate::quota::repo::{MemorySubscriptions, MemoryUsageStore, PgSubscriptionLookup, PgUsageStore};
use crate::quota::{SubscriptionLookup, UsageStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub usage: Arc<dyn UsageStore>,
    pub subscriptions: Arc<dyn SubscriptionLookup>,
    pub generator: Arc<dyn TextGenerator>,
    pub queue: JobQueue,
}

impl AppState {
    /// Build the state from the environment. The receiver half of the job
    /// queue goes to the worker pool.
    pub async fn init() -> anyhow::Result<(Self, WorkReceiver)> {
        let config = AppConfig::from_env()?;
        let generator = Arc::new(HttpTextGenerator::new(config.generation.clone())?);

        match config.store {
            StoreBackend::Memory => {
                tracing::warn!("using in-memory stores; jobs and usage are lost on restart");
                Ok(Self::in_memory(config, generator))
            }
            StoreBackend::Postgres => {
                let pool = db::connect(&config).await?;
                db::migrate(&pool).await?;
                let (queue, rx) = JobQueue::new(config.workers.queue_capacity);
                let st = Self {
                    jobs: Arc::new(PgJobStore::new(pool.clone())),
                    usage: Arc::new(PgUsageStore::new(pool.clone())),
                    subscriptions: Arc::new(PgSubscriptionLookup::new(pool)),
                    generator,
                    queue,
                    config: Arc::new(config),
                };
                Ok((st, rx))
            }
        }
    }

    pub fn in_memory(config: AppConfig, generator: Arc<dyn TextGenerator>) -> (Self, WorkReceiver) {
        let (queue, rx) = JobQueue::new(config.workers.queue_capacity);
        let st = Self {
            config: Arc::new(config),
            jobs: Arc::new(MemoryJobStore::new()),
            usage: Arc::new(MemoryUsageStore::new()),
            subscriptions: Arc::new(MemorySubscriptions::new()),
            generator,
            queue,
        };
        (st, rx)
    }

    /// In-memory state whose generator always answers with an empty object.
    pub fn fake() -> (Self, WorkReceiver) {
        Self::in_memory(
            AppConfig::for_tests(),
            Arc::new(ScriptedGenerator::replying("{}")),
        )
    }
}
