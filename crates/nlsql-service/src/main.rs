use anyhow::Context;
use clap::Parser;
use nlsql_service::{build_state, config::ServiceConfig, router};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nlsql_service=debug")),
        )
        .init();

    let cfg = ServiceConfig::parse();
    cfg.validate().context("validate config")?;
    let addr: SocketAddr = cfg.bind.parse().context("parse bind addr")?;

    let state = build_state(cfg).context("build state")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind tcp listener")?;
    let local = listener.local_addr().context("read local addr")?;
    tracing::info!(addr = %local, "nl-sql service listening");

    axum::serve(listener, app)
        .await
        .context("serve nl-sql service")?;
    Ok(())
}
