use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use stagegate::config::{PortalConfig, ENV_HTTP_PORT, ENV_PROFILES_FILE, ENV_ROUTES_FILE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = PortalConfig::from_env()?;
    info!(
        target: "startup",
        "stagegate starting: RUST_LOG='{}', {}={}, {}={:?}, {}={:?}",
        rust_log,
        ENV_HTTP_PORT, config.http_port,
        ENV_ROUTES_FILE, config.routes_file,
        ENV_PROFILES_FILE, config.profiles_file
    );

    stagegate::server::run(config).await
}
