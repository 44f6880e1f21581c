//! Live stream ad-censoring worker binary.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use admute_media::{check_ffmpeg, check_ffprobe, FfmpegCodec, FfmpegCodecConfig};
use admute_ml_client::MlClient;
use admute_worker::metrics::init_metrics;
use admute_worker::{PipelineServices, SessionManager, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("admute=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting admute-worker");

    // Load configuration
    let config = WorkerConfig::from_env();
    config.validate().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).context("failed to start metrics exporter")?;
        info!(%addr, "Prometheus metrics listener started");
    }

    let ffmpeg = check_ffmpeg().context("ffmpeg is required")?;
    let ffprobe = check_ffprobe().context("ffprobe is required")?;
    info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Found FFmpeg tools");

    let ml = Arc::new(MlClient::from_env().context("failed to create ML client")?);
    match ml.health_check().await {
        Ok(true) => info!(url = %ml.config().base_url, "ML service healthy"),
        Ok(false) => bail!("ML service at {} reports unhealthy", ml.config().base_url),
        Err(e) => bail!("ML service at {} unreachable: {}", ml.config().base_url, e),
    }

    let codec = FfmpegCodec::new(FfmpegCodecConfig {
        sample_rate: config.audio.sample_rate,
        timeout_secs: config.ffmpeg_timeout_secs,
        ..Default::default()
    });

    tokio::fs::create_dir_all(&config.input_root)
        .await
        .with_context(|| format!("cannot create {}", config.input_root.display()))?;

    let services = PipelineServices {
        codec: Arc::new(codec),
        transcriber: ml.clone(),
        classifier: ml,
    };
    let manager = Arc::new(SessionManager::new(config, services));

    // Setup signal handler
    let signal_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_manager.shutdown();
    });

    manager.run().await?;

    info!("Worker shutdown complete");
    Ok(())
}
