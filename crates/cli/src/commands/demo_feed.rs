//! `agentpay demo-feed` — in-memory feed server for local runs

use crate::error::CliResult;
use agentpay_autonomous::{demo_feed_router, DemoFeed};
use clap::Args;
use std::sync::Arc;
use tracing::info;

/// Arguments for the demo feed server
#[derive(Args)]
pub struct DemoFeedArgs {
    /// Port the feed listens on
    #[arg(long, default_value_t = 8765)]
    pub port: u16,
}

pub async fn run(args: DemoFeedArgs) -> CliResult<()> {
    let state = Arc::new(DemoFeed::new());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, "demo feed listening");
    axum::serve(listener, demo_feed_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
