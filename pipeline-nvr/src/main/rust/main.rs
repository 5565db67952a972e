use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pipeline_nvr::{
    serve_metrics, ChannelRegistry, Config, FfmpegLauncher, FileKeyStore, FsDayFolderStore,
    GStreamerSource, IngestService, IngestSettings, MaintenanceService, PrometheusReporter,
    RecordingService, RetentionSweeper, SysinfoDiskSpace,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = Config::parse();
    config.validate()?;

    // Initialize logging
    let filter = if config.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Initialize GStreamer (infrastructure concern)
    gstreamer::init()?;

    // Initialize metrics
    PrometheusReporter::init_metrics()?;

    info!("Starting NVR pipeline");
    info!("  Streams file: {}", config.streams_file.display());
    info!("  Recordings: {}", config.recordings_root().display());
    info!("  Metrics port: {}", config.metrics_port);

    let policy = config
        .to_retention_policy()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let registry = Arc::new(
        ChannelRegistry::new(config.to_registry_settings())
            .map_err(|e| anyhow::anyhow!("{}", e))?,
    );
    for (stream_id, stream) in config.load_streams()? {
        if let Err(e) = registry.add_stream(&stream_id, stream) {
            warn!(stream = %stream_id, error = %e, "Skipping invalid stream");
        }
    }

    // Create infrastructure implementations (dependency injection)
    let metrics = Arc::new(PrometheusReporter::new());
    let recorder_settings = config.to_recorder_settings();
    let recordings_root = recorder_settings.layout.root().to_path_buf();
    let recorder = Arc::new(RecordingService::new(
        Arc::clone(&registry),
        Arc::new(FfmpegLauncher::new()),
        Arc::new(FileKeyStore::new(config.key_root(), config.key_url_template.clone())),
        metrics.clone(),
        recorder_settings,
    ));
    let ingest = Arc::new(
        IngestService::new(
            Arc::clone(&registry),
            Arc::new(GStreamerSource::new()),
            metrics.clone(),
            IngestSettings::default(),
        )
        .with_recorder(Arc::clone(&recorder)),
    );
    let maintenance = MaintenanceService::new(
        RetentionSweeper::new(
            Arc::new(FsDayFolderStore::new(recordings_root.clone())),
            Arc::new(SysinfoDiskSpace::new()),
            recordings_root,
            policy,
            metrics,
        ),
        Arc::clone(&recorder),
    );

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = watch::channel(false);

    let maintenance_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { maintenance.run(shutdown).await })
    };

    let metrics_handle = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(serve_metrics(config.metrics_port, ready_rx, async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        }))
    };

    let started = ingest.run_all();
    info!(started, "Always-on channels started");
    let _ = ready_tx.send(true);

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    ingest.stop_all();
    let stopped = recorder.stop_all().await;
    info!(stopped, "Recordings stopped");
    let _ = shutdown_tx.send(true);

    if let Err(e) = maintenance_handle.await {
        error!("Maintenance task failed: {}", e);
    }
    metrics_handle.await?;

    info!("Pipeline shutdown complete");
    Ok(())
}
