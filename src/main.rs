use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use rs_emotion_svc::config::config::AppConfig;
use rs_emotion_svc::helper::land_marker::LandMarker;
use rs_emotion_svc::pipeline::pipeline::EmotionPipeline;
use rs_emotion_svc::server::routes::{router, AppState};
use rs_emotion_svc::utils::logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    for path in config.required_files() {
        if !path.is_file() {
            anyhow::bail!("required file not found: {}", path.display());
        }
    }

    info!("loading face detector and landmark model");
    let land_marker = LandMarker::new(
        &config.cascade_path,
        &config.landmark_model_path,
        config.detector.clone(),
    )
    .context("failed to load landmark models")?;

    info!("fitting classifier from {}", config.dataset_path.display());
    let pipeline = EmotionPipeline::fit(
        Box::new(land_marker),
        &config.dataset_path,
        &config.classifier,
    )
    .context("failed to initialize classifier")?;
    info!("label space: {:?}", pipeline.label_names());

    let app = router(AppState::new(pipeline));

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
