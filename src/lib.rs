pub mod app;
pub mod auth;
pub mod automation;
pub mod cache_policy;
pub mod cart;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifications;
pub mod payments;
pub mod quotes;
pub mod security;
pub mod services;
pub mod types;

pub use app::{router, AppState};

/// `RUST_LOG`-driven subscriber; defaults to info for this crate and tower-http
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("catering_storefront=info,tower_http=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
