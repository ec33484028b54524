use clap::Args;
use std::net::SocketAddr;

use crate::app::router;
use crate::cli::load_state;
use crate::services::automation_service::spawn_background;
use crate::services::housekeeping_service::spawn_housekeeping;

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, help = "Port to bind (defaults to PORT or the configured port)")]
    pub port: Option<u16>,

    #[arg(long, default_value = "0.0.0.0", help = "Interface to bind")]
    pub host: String,

    #[arg(long, help = "Do not start the background automation runner")]
    pub no_automation: bool,
}

pub async fn handle(args: ServeArgs) -> anyhow::Result<()> {
    let state = load_state()?;
    tracing::info!("Starting catering storefront in {:?} mode", state.config.environment);

    if crate::is_production!() && !state.config.security.require_https {
        tracing::warn!("Running in production without SECURITY_REQUIRE_HTTPS; session cookies will not be Secure");
    }

    if state.config.database.run_migrations {
        state.db.migrate().await?;
    }

    let housekeeping = spawn_housekeeping(state.clone());
    let runner = if state.config.automation.enabled && !args.no_automation {
        Some(spawn_background(state.clone()))
    } else {
        None
    };

    let port = args.port.unwrap_or(state.config.server.port);
    let bind_addr = format!("{}:{}", args.host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", bind_addr);

    let db = state.db.clone();
    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    housekeeping.abort();
    if let Some(runner) = runner {
        runner.abort();
    }
    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
