//! HTTP server entry point. `PORT` selects the listen port (default
//! 3200); exits 0 on graceful shutdown.

use harbormcp_server::{HttpServerConfig, demo, http, logging};

const DEFAULT_PORT: u16 = 3200;

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> harbormcp_server::ServerResult<()> {
    logging::init_http_logging();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let service = demo::demo_service();
    let router = http::router(service, HttpServerConfig::default());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "harbormcp HTTP server listening");

    http::serve(listener, router, shutdown_signal()).await?;
    tracing::info!("harbormcp HTTP server stopped");
    Ok(())
}
