//! Stdio server entry point: stdin/stdout are the protocol channel,
//! stderr carries JSON diagnostics. No flags.

use harbormcp_server::{demo, logging, stdio_server};

#[tokio::main]
async fn main() -> harbormcp_server::ServerResult<()> {
    logging::init_stdio_logging();
    tracing::info!("harbormcp stdio server starting");

    let service = demo::demo_service();
    stdio_server::run(service).await?;

    tracing::info!("harbormcp stdio server stopped");
    Ok(())
}
