use std::sync::Arc;

use anyhow::Context;

use affwriter_infra::config::DatabaseConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    affwriter_observability::init();

    let config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let services = Arc::new(affwriter_api::app::services::build_services(&config).await?);
    let app = affwriter_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
