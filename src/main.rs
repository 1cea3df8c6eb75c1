// Media generation relay: forwards uploads to the vendor API and waits for
// the finished artifact.

use media_job_relay::capability::{builtin_profiles, load_profiles};
use media_job_relay::config::AppConfig;
use media_job_relay::server::{router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("media_job_relay=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let profiles = match &config.profiles_file {
        Some(path) => load_profiles(path)?,
        None => builtin_profiles(&config.api_host),
    };
    info!(
        count = profiles.len(),
        timeout_secs = config.poll_timeout.as_secs(),
        "Loaded capability profiles"
    );

    let app = router(AppState::from_config(&config, profiles));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    info!("🚀 Server running on http://{}", config.bind_addr);
    info!("📸 POST to /generate/<capability> to start generating!");

    axum::serve(listener, app).await?;
    Ok(())
}
