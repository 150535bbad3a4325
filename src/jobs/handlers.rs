use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{JobAccepted, JobStatusResponse, ProcessRequest, RecentQuery};
use super::services;
use crate::{auth::AuthUser, error::AppError, planner::PlanRequest, state::AppState};

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/meal-plans/jobs", post(create_job))
        .route("/meal-plans/jobs/recent", get(recent_jobs))
        .route("/meal-plans/jobs/process", post(process_jobs))
        .route("/meal-plans/jobs/:id", get(job_status).delete(cancel_job))
}

/// Queue a meal plan. Answers 202 as soon as the job is stored.
#[instrument(skip(state, body))]
pub async fn create_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<PlanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let Json(req) = body?;
    let accepted = services::create_job(&state, user_id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[instrument(skip(state))]
pub async fn job_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = services::load_owned(&state, user_id, id).await?;
    Ok(Json(job.into()))
}

#[instrument(skip(state))]
pub async fn recent_jobs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<JobStatusResponse>>, AppError> {
    let Query(q) = query?;
    let jobs = services::recent_jobs(&state, user_id, q.limit).await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// Manual trigger. Body is optional; without a job id the caller's oldest
/// pending job is taken. A body that is present must parse. 204 when there
/// is nothing to do.
#[instrument(skip(state, body))]
pub async fn process_jobs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<Response, AppError> {
    let job_id = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let Json(req) = Json::<ProcessRequest>::from_bytes(&body)?;
        req.job_id
    };
    match services::trigger_processing(&state, user_id, job_id).await? {
        Some(job) => Ok((
            StatusCode::ACCEPTED,
            Json(JobAccepted {
                job_id: job.id,
                status: job.status,
            }),
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[instrument(skip(state))]
pub async fn cancel_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    services::cancel_job(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_app;
    use crate::auth::JwtKeys;
    use crate::config::AppConfig;
    use crate::jobs::worker::WorkReceiver;
    use crate::planner::{parser::tests::plan_json, ScriptedGenerator};
    use crate::quota::repo::MemoryUsageStore;
    use crate::quota::UsageStore;

    fn state() -> (AppState, WorkReceiver) {
        AppState::in_memory(
            AppConfig::for_tests(),
            Arc::new(ScriptedGenerator::replying(plan_json(2, 3))),
        )
    }

    fn token(st: &AppState, user: Uuid) -> String {
        JwtKeys::from_config(&st.config.jwt).sign_access(user).unwrap()
    }

    fn plan_body() -> Value {
        json!({
            "days": 2,
            "mealsPerDay": 3,
            "people": 2,
            "targetCalories": 2200,
            "restrictions": ["vegetarian"],
            "allergies": ["peanuts"],
            "cuisinePreferences": ["italian"],
            "inventory": [{ "name": "Tomatoes", "priority": true }],
            "inventoryMode": "priority"
        })
    }

    async fn send(
        st: &AppState,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = build_app(st.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn create_then_poll_lifecycle() {
        let (st, _rx) = state();
        let user = Uuid::new_v4();
        let t = token(&st, user);

        let (status, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

        let uri = format!("/api/v1/meal-plans/jobs/{job_id}");
        let (status, body) = send(&st, Method::GET, &uri, Some(&t), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert!(body.get("result").is_none());

        services::claim_and_process(&st, job_id).await;

        let (status, body) = send(&st, Method::GET, &uri, Some(&t), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"]["dailyPlans"].as_array().unwrap().len(), 2);
        assert!(body["completedAt"].is_string());
    }

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let (st, _rx) = state();
        let (status, _) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", None, Some(plan_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some("not-a-token"), Some(plan_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_bodies_are_bad_requests() {
        let (st, _rx) = state();
        let t = token(&st, Uuid::new_v4());
        let mut body = plan_body();
        body["days"] = json!(0);
        let (status, value) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["code"], "VALIDATION_ERROR");

        let (status, _) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(json!({"days": "two"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exhausted_quota_is_429_and_creates_nothing() {
        let (mut st, _rx) = state();
        let usage = Arc::new(MemoryUsageStore::new());
        st.usage = usage.clone();
        let user = Uuid::new_v4();
        for _ in 0..crate::quota::services::FREE_PERIOD_LIMIT {
            usage.increment(user, time::OffsetDateTime::now_utc()).await.unwrap();
        }
        let t = token(&st, user);

        let (status, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["planTier"], "free");
        assert_eq!(body["remaining"], 0);
        assert!(st.jobs.list_recent(user, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_users_cannot_see_or_cancel_a_job() {
        let (st, _rx) = state();
        let owner = Uuid::new_v4();
        let t = token(&st, owner);
        let (_, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        let uri = format!("/api/v1/meal-plans/jobs/{}", body["jobId"].as_str().unwrap());

        let intruder = token(&st, Uuid::new_v4());
        let (status, _) = send(&st, Method::GET, &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&st, Method::DELETE, &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = format!("/api/v1/meal-plans/jobs/{}", Uuid::new_v4());
        let (status, _) = send(&st, Method::GET, &missing, Some(&t), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_then_cancel_again_conflicts() {
        let (st, _rx) = state();
        let t = token(&st, Uuid::new_v4());
        let (_, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        let uri = format!("/api/v1/meal-plans/jobs/{}", body["jobId"].as_str().unwrap());

        let (status, _) = send(&st, Method::DELETE, &uri, Some(&t), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&st, Method::GET, &uri, Some(&t), None).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], services::CANCELLED_MESSAGE);

        let (status, _) = send(&st, Method::DELETE, &uri, Some(&t), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn manual_trigger_claims_pending_job_once() {
        let (st, _rx) = state();
        let user = Uuid::new_v4();
        let t = token(&st, user);

        let (status, _) = send(&st, Method::POST, "/api/v1/meal-plans/jobs/process", Some(&t), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        let job_id = body["jobId"].clone();

        let (status, body) = send(
            &st,
            Method::POST,
            "/api/v1/meal-plans/jobs/process",
            Some(&t),
            Some(json!({ "jobId": job_id })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");

        let (status, _) = send(
            &st,
            Method::POST,
            "/api/v1/meal-plans/jobs/process",
            Some(&t),
            Some(json!({ "jobId": job_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_trigger_body_is_rejected_and_claims_nothing() {
        let (st, _rx) = state();
        let user = Uuid::new_v4();
        let t = token(&st, user);
        let (_, body) = send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

        for bad in [json!({ "jobId": "not-a-uuid" }), json!({ "jobId": 42 })] {
            let (status, value) =
                send(&st, Method::POST, "/api/v1/meal-plans/jobs/process", Some(&t), Some(bad)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(value["code"], "VALIDATION_ERROR");
        }
        let job = st.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, crate::jobs::JobStatus::Pending);

        let (status, body) =
            send(&st, Method::POST, "/api/v1/meal-plans/jobs/process", Some(&t), Some(json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["jobId"], job_id.to_string());
    }

    #[tokio::test]
    async fn non_numeric_recent_limit_is_json_validation_error() {
        let (st, _rx) = state();
        let t = token(&st, Uuid::new_v4());
        let (status, body) =
            send(&st, Method::GET, "/api/v1/meal-plans/jobs/recent?limit=lots", Some(&t), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn recent_lists_only_own_jobs() {
        let (st, _rx) = state();
        let user = Uuid::new_v4();
        let t = token(&st, user);
        for _ in 0..3 {
            send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&t), Some(plan_body())).await;
        }
        let other = token(&st, Uuid::new_v4());
        send(&st, Method::POST, "/api/v1/meal-plans/jobs", Some(&other), Some(plan_body())).await;

        let (status, body) = send(&st, Method::GET, "/api/v1/meal-plans/jobs/recent?limit=2", Some(&t), None).await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j["status"] == "pending"));

        let (_, body) = send(&st, Method::GET, "/api/v1/meal-plans/jobs/recent", Some(&t), None).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }
}
