use mealplanner::{app, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "mealplanner=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (state, rx) = AppState::init().await?;
    let workers = state.config.workers.clone();
    tracing::info!(
        workers = workers.workers,
        queue_capacity = workers.queue_capacity,
        stale_after_secs = workers.stale_after_secs,
        "starting job workers"
    );
    jobs::spawn_workers(state.clone(), rx, workers.workers);
    jobs::spawn_sweeper(state.clone());

    app::serve(app::build_app(state)).await
}
