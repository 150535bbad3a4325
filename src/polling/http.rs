use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use super::{poll_until_terminal, recover_from_recent, CancelToken, PollConfig, PollError, SourceError, StatusSource};
use crate::jobs::dto::{JobAccepted, JobStatusResponse};
use crate::planner::{MealPlanResult, PlanRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Talks to the job endpoints on behalf of one signed-in user.
#[derive(Clone)]
pub struct HttpStatusClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpStatusClient {
    /// `base_url` points at the API root, e.g. `http://host:8080/api/v1`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, SourceError> {
        let res = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let message = res.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            Err(SourceError::Transient(format!("{status}: {message}")))
        } else {
            Err(SourceError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, SourceError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))
    }

    pub async fn create(&self, req: &PlanRequest) -> Result<JobAccepted, SourceError> {
        self.json(self.http.post(self.url("/meal-plans/jobs")).json(req))
            .await
    }

    /// Create a job and wait for its plan. After a polling timeout the recent
    /// jobs list is checked once before giving up.
    pub async fn generate(
        &self,
        req: &PlanRequest,
        config: &PollConfig,
        cancel: CancelToken,
    ) -> Result<MealPlanResult, PollError> {
        let accepted = self.create(req).await.map_err(|e| match e {
            SourceError::Rejected { status, message } => PollError::Rejected { status, message },
            SourceError::Transient(m) => PollError::Failed(m),
        })?;
        info!(job_id = %accepted.job_id, "meal plan job submitted");

        match poll_until_terminal(self, accepted.job_id, config, cancel).await {
            Err(PollError::TimedOut { job_id, attempts }) => {
                match recover_from_recent(self, job_id, 5).await {
                    Ok(Some(plan)) => Ok(plan),
                    Ok(None) => Err(PollError::TimedOut { job_id, attempts }),
                    Err(e) => {
                        warn!(%job_id, error = %e, "recent jobs lookup failed");
                        Err(PollError::TimedOut { job_id, attempts })
                    }
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    async fn status(&self, job_id: Uuid) -> Result<JobStatusResponse, SourceError> {
        self.json(self.http.get(self.url(&format!("/meal-plans/jobs/{job_id}"))))
            .await
    }

    async fn cancel(&self, job_id: Uuid) -> Result<(), SourceError> {
        self.send(self.http.delete(self.url(&format!("/meal-plans/jobs/{job_id}"))))
            .await?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<JobStatusResponse>, SourceError> {
        self.json(
            self.http
                .get(self.url("/meal-plans/jobs/recent"))
                .query(&[("limit", limit)]),
        )
        .await
    }
}
