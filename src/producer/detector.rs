use ndarray::{Array4, ArrayViewD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const YOLO_INPUT_SIZE: u32 = 640;
const PERSON_CLASS_ID: usize = 0;
const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: f64 = 114.0;

/// A person bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Maps model input coordinates back onto the original frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: f32,
    pub orig_h: f32,
}

impl Letterbox {
    pub fn for_frame(cols: f32, rows: f32) -> Self {
        let input_size = YOLO_INPUT_SIZE as f32;
        let scale = (input_size / cols).min(input_size / rows);
        let new_w = (cols * scale).round() as i32;
        let new_h = (rows * scale).round() as i32;

        Self {
            scale,
            pad_x: ((YOLO_INPUT_SIZE as i32 - new_w) / 2) as f32,
            pad_y: ((YOLO_INPUT_SIZE as i32 - new_h) / 2) as f32,
            orig_w: cols,
            orig_h: rows,
        }
    }

    fn resized(&self) -> (i32, i32) {
        (
            (self.orig_w * self.scale).round() as i32,
            (self.orig_h * self.scale).round() as i32,
        )
    }

    /// Converts a centre-format box in model pixels to a clamped frame box.
    fn to_frame(&self, confidence: f32, cx: f32, cy: f32, w: f32, h: f32) -> Detection {
        let x = ((cx - w / 2.0) - self.pad_x) / self.scale;
        let y = ((cy - h / 2.0) - self.pad_y) / self.scale;

        let x = x.max(0.0).min(self.orig_w);
        let y = y.max(0.0).min(self.orig_h);

        Detection {
            confidence,
            x,
            y,
            width: (w / self.scale).min(self.orig_w - x),
            height: (h / self.scale).min(self.orig_h - y),
        }
    }
}

pub struct PersonDetector {
    session: Session,
    confidence_threshold: f32,
}

impl PersonDetector {
    pub fn new(model_path: &str, confidence_threshold: f32) -> Result<Self, BoxError> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path)?
        } else {
            builder.commit_from_file(model_path)?
        };

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    pub fn detect(&mut self, frame: &opencv::core::Mat) -> Result<Vec<Detection>, BoxError> {
        use opencv::prelude::*;

        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::for_frame(cols as f32, rows as f32);
        let input_tensor = preprocess(frame, &letterbox)?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;

        if let (Some(logits_val), Some(boxes_val)) =
            (outputs.get("logits"), outputs.get("pred_boxes"))
        {
            let logits = logits_val.try_extract_array::<f32>()?.to_owned();
            let boxes = boxes_val.try_extract_array::<f32>()?.to_owned();
            drop(outputs);

            return decode_end_to_end(
                &logits.view(),
                &boxes.view(),
                self.confidence_threshold,
                &letterbox,
            );
        }

        let Some(output) = outputs.get("output0") else {
            return Err(
                "unsupported model format: expected 'logits'/'pred_boxes' or 'output0' outputs"
                    .into(),
            );
        };
        let output = output.try_extract_array::<f32>()?.to_owned();
        drop(outputs);

        let candidates = decode_yolov8(&output.view(), self.confidence_threshold, &letterbox)?;
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

fn preprocess(frame: &opencv::core::Mat, letterbox: &Letterbox) -> Result<Array4<f32>, BoxError> {
    use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
    use opencv::imgproc;
    use opencv::prelude::*;

    let input_size = YOLO_INPUT_SIZE as i32;
    let (new_w, new_h) = letterbox.resized();
    let pad_x = letterbox.pad_x as i32;
    let pad_y = letterbox.pad_y as i32;

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        input_size - new_h - pad_y,
        pad_x,
        input_size - new_w - pad_x,
        BORDER_CONSTANT,
        Scalar::new(LETTERBOX_FILL, LETTERBOX_FILL, LETTERBOX_FILL, 0.0),
    )?;

    let mut rgb = Mat::default();
    imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let data = rgb.data_bytes()?;
    let size = YOLO_INPUT_SIZE as usize;
    if data.len() < size * size * 3 {
        return Err("frame data too small".into());
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 3;
            tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
            tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
        }
    }

    Ok(tensor)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decodes end-to-end outputs: `logits` [1, N, C] and `pred_boxes` [1, N, 4]
/// holding normalized (cx, cy, w, h). No NMS is needed for these models.
pub fn decode_end_to_end(
    logits: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, BoxError> {
    let logits_shape = logits.shape();
    if logits_shape.len() < 2 || boxes.ndim() < 2 {
        return Ok(Vec::new());
    }

    let (num_detections, num_classes) = if logits_shape.len() == 3 {
        (logits_shape[1], logits_shape[2])
    } else {
        (logits_shape[0], logits_shape[1])
    };

    let logits_flat = logits.as_slice().ok_or("cannot get logits slice")?;
    let boxes_flat = boxes.as_slice().ok_or("cannot get boxes slice")?;
    if boxes_flat.len() < num_detections * 4 {
        return Err("pred_boxes shorter than logits".into());
    }

    let input_size = YOLO_INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for i in 0..num_detections {
        let scores = &logits_flat[i * num_classes..(i + 1) * num_classes];
        let Some((best_class, best_logit)) = argmax(scores) else {
            continue;
        };
        let score = sigmoid(best_logit);

        if best_class != PERSON_CLASS_ID || score < confidence_threshold {
            continue;
        }

        let b = &boxes_flat[i * 4..i * 4 + 4];
        detections.push(letterbox.to_frame(
            score,
            b[0] * input_size,
            b[1] * input_size,
            b[2] * input_size,
            b[3] * input_size,
        ));
    }

    Ok(detections)
}

/// Decodes a YOLOv8 head `[1, 4 + C, N]` of pixel (cx, cy, w, h) and class
/// scores. Returns person candidates before suppression.
pub fn decode_yolov8(
    output: &ArrayViewD<f32>,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, BoxError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= 4 {
        return Err(format!("unexpected output shape {:?}", shape).into());
    }

    let num_features = shape[1];
    let num_anchors = shape[2];
    let mut detections = Vec::new();

    for i in 0..num_anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 4..num_features {
            let score = output[[0, c, i]];
            if score > best_score {
                best_score = score;
                best_class = c - 4;
            }
        }

        if best_class != PERSON_CLASS_ID || best_score < confidence_threshold {
            continue;
        }

        detections.push(letterbox.to_frame(
            best_score,
            output[[0, 0, i]],
            output[[0, 1, i]],
            output[[0, 2, i]],
            output[[0, 3, i]],
        ));
    }

    Ok(detections)
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Greedy NMS, highest confidence first.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn identity_letterbox() -> Letterbox {
        Letterbox::for_frame(640.0, 640.0)
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::for_frame(1280.0, 720.0);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        assert_eq!(lb.resized(), (640, 360));
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::for_frame(1280.0, 720.0);
        // 100x50 box centred at (320, 320) in model space
        let det = lb.to_frame(0.9, 320.0, 320.0, 100.0, 50.0);
        assert_eq!(det.x, 540.0);
        assert_eq!(det.y, 310.0);
        assert_eq!(det.width, 200.0);
        assert_eq!(det.height, 100.0);
    }

    #[test]
    fn test_letterbox_clamps_to_frame() {
        let lb = identity_letterbox();
        let det = lb.to_frame(0.9, 10.0, 630.0, 40.0, 40.0);
        assert_eq!(det.x, 0.0);
        assert_eq!(det.height, 30.0);
    }

    #[test]
    fn test_decode_end_to_end_keeps_confident_persons() {
        // three queries, two classes (person, bicycle)
        let logits = Array3::from_shape_vec(
            (1, 3, 2),
            vec![
                3.0, -2.0, // person, confident
                -3.0, -2.0, // person, too weak
                -1.0, 4.0, // bicycle
            ],
        )
        .unwrap()
        .into_dyn();
        let boxes = Array3::from_shape_vec(
            (1, 3, 4),
            vec![
                0.5, 0.5, 0.25, 0.5, //
                0.2, 0.2, 0.1, 0.1, //
                0.7, 0.7, 0.1, 0.1,
            ],
        )
        .unwrap()
        .into_dyn();

        let dets =
            decode_end_to_end(&logits.view(), &boxes.view(), 0.5, &identity_letterbox()).unwrap();
        assert_eq!(dets.len(), 1);
        assert!(dets[0].confidence > 0.95);
        assert_eq!(dets[0].x, 240.0);
        assert_eq!(dets[0].y, 160.0);
        assert_eq!(dets[0].width, 160.0);
        assert_eq!(dets[0].height, 320.0);
    }

    #[test]
    fn test_decode_yolov8_filters_class_and_threshold() {
        // features: cx, cy, w, h, person, car; anchors: 3
        let mut output = Array3::<f32>::zeros((1, 6, 3));
        for (i, (person, car)) in [(0.8, 0.1), (0.2, 0.1), (0.6, 0.9)].iter().enumerate() {
            output[[0, 0, i]] = 100.0;
            output[[0, 1, i]] = 100.0;
            output[[0, 2, i]] = 20.0;
            output[[0, 3, i]] = 40.0;
            output[[0, 4, i]] = *person;
            output[[0, 5, i]] = *car;
        }

        let dets =
            decode_yolov8(&output.into_dyn().view(), 0.25, &identity_letterbox()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.8);
        assert_eq!(dets[0].x, 90.0);
        assert_eq!(dets[0].y, 80.0);
    }

    #[test]
    fn test_decode_yolov8_rejects_bad_shape() {
        let output = Array3::<f32>::zeros((1, 4, 10)).into_dyn();
        assert!(decode_yolov8(&output.view(), 0.25, &identity_letterbox()).is_err());
    }

    #[test]
    fn test_iou() {
        let a = Detection {
            confidence: 0.9,
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let b = Detection { x: 5.0, ..a };
        let c = Detection { x: 20.0, ..a };
        assert_eq!(iou(&a, &a), 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn test_non_max_suppression() {
        let strong = Detection {
            confidence: 0.9,
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let overlapping = Detection {
            confidence: 0.7,
            x: 1.0,
            ..strong
        };
        let separate = Detection {
            confidence: 0.5,
            x: 50.0,
            ..strong
        };

        let kept = non_max_suppression(vec![overlapping, separate, strong], NMS_IOU_THRESHOLD);
        assert_eq!(kept, vec![strong, separate]);
    }
}
