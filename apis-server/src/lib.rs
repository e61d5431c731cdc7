pub mod app;
pub mod config;
pub mod cookies;
pub mod db;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod tenancy;

pub use app::{build_router, AppState};
