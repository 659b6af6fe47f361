use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use video_transcriber::{
    acquisition::MediaAcquirer,
    api,
    config::Config,
    engine::JobEngine,
    engines::whisper::{WhisperDecoder, WhisperDecoderParams, WHISPER_SAMPLE_RATE},
    roles::KeywordRoleClassifier,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;
    if config.sample_rate != WHISPER_SAMPLE_RATE {
        return Err(format!(
            "the whisper decoder needs {WHISPER_SAMPLE_RATE} Hz audio, got --sample-rate {}",
            config.sample_rate
        )
        .into());
    }

    std::fs::create_dir_all(&config.output_dir)?;
    log::info!("Transcripts directory: {}", config.output_dir.display());

    let decoder = WhisperDecoder::load(
        &config.model_path,
        WhisperDecoderParams {
            language: config.language.clone(),
            threads: config.whisper_threads,
            chunk_size: config.chunk_samples(),
            window_secs: config.window_secs,
            ..Default::default()
        },
    )?;

    let acquirer = MediaAcquirer::with_tools(
        config.ytdlp_bin.clone(),
        config.ffmpeg_bin.clone(),
        config.sample_rate,
    );

    let engine = Arc::new(JobEngine::new(
        config.engine_config(),
        decoder,
        Arc::new(KeywordRoleClassifier::default()),
        Arc::new(acquirer),
    ));
    let sweeper = engine.spawn_retention_sweeper();

    let app = api::router(Arc::clone(&engine), config.max_upload_bytes());
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    log::info!("Video transcriber listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("Shutdown signal received");
}
