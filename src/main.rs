use clap::Parser;
use mcpo_bridge::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        config_file = %settings.config_file.display(),
        jobs_dir = %settings.jobs_dir.display(),
        "starting mcpo-bridge"
    );

    mcpo_bridge::run(settings).await
}
