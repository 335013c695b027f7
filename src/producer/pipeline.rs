use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use axum::body::Bytes;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::ProducerConfig;

use super::capture::{self, Camera};
use super::detector::PersonDetector;
use super::reporter::CountReporter;
use super::ProducerError;

const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Capture, detect, report, publish. Runs on a blocking thread.
struct FrameLoop {
    camera_id: String,
    camera: Camera,
    detector: PersonDetector,
    reporter: CountReporter,
    runtime: Handle,
    frames: watch::Sender<Option<Bytes>>,
    process_every_n_frames: u64,
    frame_count: u64,
}

impl FrameLoop {
    fn new(
        config: &ProducerConfig,
        reporter: CountReporter,
        runtime: Handle,
        frames: watch::Sender<Option<Bytes>>,
    ) -> Result<Self, ProducerError> {
        let camera = Camera::open(config.device, config.frame_width, config.frame_height)?;
        let detector = PersonDetector::new(&config.model, config.confidence_threshold)
            .map_err(|e| ProducerError::Detector(e.to_string()))?;

        tracing::info!(camera = %config.camera_id, model = %config.model, "person detector loaded");

        Ok(Self {
            camera_id: config.camera_id.clone(),
            camera,
            detector,
            reporter,
            runtime,
            frames,
            process_every_n_frames: config.process_every_n_frames,
            frame_count: 0,
        })
    }

    fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<(), ProducerError> {
        tracing::info!(camera = %self.camera_id, "frame loop started");

        while !shutdown.load(Ordering::Relaxed) {
            let Some(mut frame) = self.camera.read()? else {
                thread::sleep(EMPTY_READ_BACKOFF);
                continue;
            };

            self.frame_count += 1;

            if should_process(self.frame_count, self.process_every_n_frames) {
                match self.detector.detect(&frame) {
                    Ok(detections) => {
                        let people_count = detections.len() as i64;
                        capture::annotate(&mut frame, &detections)?;

                        tracing::trace!(
                            camera = %self.camera_id,
                            frame = self.frame_count,
                            people = people_count,
                            "frame processed"
                        );

                        // One post at a time; a slow aggregator slows the loop
                        // instead of queueing requests.
                        self.runtime.block_on(self.reporter.report(people_count));
                    }
                    Err(e) => {
                        tracing::warn!(camera = %self.camera_id, error = %e, "detection failed");
                    }
                }
            }

            if let Some(jpeg) = capture::encode_jpeg(&frame) {
                self.frames.send_replace(Some(Bytes::from(jpeg)));
            }
        }

        tracing::info!(camera = %self.camera_id, "frame loop stopped");
        Ok(())
    }
}

fn should_process(frame_count: u64, every_n: u64) -> bool {
    every_n <= 1 || frame_count % every_n == 0
}

pub fn spawn_frame_loop(
    config: ProducerConfig,
    reporter: CountReporter,
    frames: watch::Sender<Option<Bytes>>,
    shutdown: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<Result<(), ProducerError>> {
    let runtime = Handle::current();
    tokio::task::spawn_blocking(move || {
        FrameLoop::new(&config, reporter, runtime, frames)?.run(shutdown)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_process() {
        assert!((1..=5).all(|n| should_process(n, 1)));
        assert!(!should_process(1, 2));
        assert!(should_process(2, 2));
        assert!(should_process(3, 3));
        assert_eq!((1..=9).filter(|n| should_process(*n, 3)).count(), 3);
    }
}
