use anyhow::Context;

use loomerp_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    loomerp_observability::init(config.log_format);

    if config.uses_development_secret() {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let app = loomerp_api::app::build_app_with(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
