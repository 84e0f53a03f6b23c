use std::sync::Arc;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coursetasks_observability::init();

    let bind = std::env::var("COURSETASKS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let rescorer = Some(coursetasks_infra::modules::correct_map_rescorer());
    let services = Arc::new(coursetasks_api::app::services::build_services(rescorer).await?);
    let app = coursetasks_api::app::build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Let queued task bodies finish before exiting.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}
