use std::sync::Arc;

use anyhow::Context;

use playpulse_api::app::{build_app, build_services};
use playpulse_infra::jobs::recover_interrupted;
use playpulse_infra::IngestConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    playpulse_observability::init();

    let config = IngestConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(build_services(&config).await?);

    recover_interrupted(services.store.as_ref(), config.local_offset)
        .await
        .context("startup recovery failed")?;

    let workers = services.start_workers();
    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("shutting down workers");
    for worker in workers {
        tracing::info!(worker = worker.name(), "stopping worker");
        worker.shutdown().await;
    }
    Ok(())
}
