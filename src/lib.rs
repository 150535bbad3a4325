pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod planner;
pub mod polling;
pub mod quota;
pub mod state;

pub use state::AppState;
