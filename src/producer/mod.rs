mod capture;
mod detector;
mod geolocate;
mod pipeline;
mod reporter;
mod stream;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::ProducerConfig;

use reporter::CountReporter;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("camera device {0} could not be opened")]
    CameraUnavailable(i32),
    #[error("detector error: {0}")]
    Detector(String),
    #[error("geolocation failed: {0}")]
    Geolocation(String),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs one camera until ctrl-c or until the frame loop fails.
pub async fn run(config: ProducerConfig) -> Result<(), ProducerError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()?;

    let location = geolocate::resolve_location(&client, &config).await?;
    let reporter = CountReporter::new(
        client,
        config.backend_url.clone(),
        config.camera_id.clone(),
        location,
    );

    tracing::info!(
        camera = %config.camera_id,
        backend = %config.backend_url,
        "reporting counts"
    );

    let (frames_tx, frames_rx) = watch::channel(None);
    let shutdown = Arc::new(AtomicBool::new(false));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.stream_port));

    let mut frame_loop =
        pipeline::spawn_frame_loop(config, reporter, frames_tx, Arc::clone(&shutdown));
    let mut server = tokio::spawn(stream::start_stream_server(frames_rx, addr));

    let result = tokio::select! {
        result = &mut frame_loop => result?,
        served = &mut server => {
            shutdown.store(true, Ordering::Relaxed);
            frame_loop.await??;
            served?.map_err(ProducerError::from)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
            frame_loop.await?
        }
    };

    server.abort();
    result
}
