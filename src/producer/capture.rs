use opencv::core::{Mat, Point, Rect, Scalar, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc, videoio};

use super::detector::Detection;
use super::ProducerError;

const BOX_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);
const BOX_THICKNESS: i32 = 2;
const LABEL: &str = "Person";
const LABEL_SCALE: f64 = 0.9;

pub struct Camera {
    device: i32,
    capture: videoio::VideoCapture,
}

impl Camera {
    pub fn open(device: i32, width: u32, height: u32) -> Result<Self, ProducerError> {
        let mut capture = videoio::VideoCapture::new(device, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(ProducerError::CameraUnavailable(device));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;

        tracing::info!(device, width, height, "camera opened");

        Ok(Self { device, capture })
    }

    /// Next frame, or `None` when the device returned nothing this time.
    pub fn read(&mut self) -> Result<Option<Mat>, ProducerError> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.rows() == 0 {
            tracing::trace!(device = self.device, "empty frame");
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

fn color() -> Scalar {
    Scalar::new(BOX_COLOR.0, BOX_COLOR.1, BOX_COLOR.2, 0.0)
}

pub fn annotate(frame: &mut Mat, detections: &[Detection]) -> Result<(), ProducerError> {
    for det in detections {
        let rect = Rect::new(
            det.x as i32,
            det.y as i32,
            det.width as i32,
            det.height as i32,
        );
        imgproc::rectangle(frame, rect, color(), BOX_THICKNESS, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            frame,
            LABEL,
            Point::new(rect.x, rect.y - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            LABEL_SCALE,
            color(),
            BOX_THICKNESS,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn encode_jpeg(frame: &Mat) -> Option<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::new();
    imgcodecs::imencode(".jpg", frame, &mut buf, &params).ok()?;
    Some(buf.to_vec())
}
