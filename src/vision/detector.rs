//! Region Detection Capability
//!
//! A YOLO-style ONNX detector behind the `RegionDetector` seam. The fixed
//! inference parameters (input resolution, confidence threshold, IoU
//! threshold) come from configuration, never from requests.

use anyhow::Result;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::DetectionSettings;
use crate::vision::models::OnnxSession;
use crate::vision::preprocess::{self, LetterboxMapping};
use crate::vision::BoundingBox;

/// Region-detection capability: one full-frame pass returning scored boxes
/// in the model's output order.
///
/// Instances are constructed once at startup and shared across sessions;
/// calls are stateless and must be safe to issue concurrently.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>>;
}

/// YOLO-style ONNX detector.
///
/// The underlying session is serialized behind a mutex so one instance can
/// be shared by concurrently running sessions.
pub struct OnnxDetector {
    session: Mutex<OnnxSession>,
    settings: DetectionSettings,
}

impl OnnxDetector {
    /// Load the detection model with its fixed inference parameters.
    pub fn new(model_path: &Path, settings: DetectionSettings) -> Result<Self> {
        let session = OnnxSession::new(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
            settings,
        })
    }
}

impl RegionDetector for OnnxDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>> {
        let rgb = preprocess::rgb_to_f32(image);
        let (letterboxed, mapping) = preprocess::letterbox(&rgb, self.settings.input_size);
        let tensor = preprocess::hwc_to_nchw(&letterboxed);

        let (shape, data) = self.session.lock().run(tensor)?;

        let candidates = decode_candidates(&shape, &data, self.settings.confidence_threshold);
        let kept = non_max_suppression(candidates, self.settings.iou_threshold);
        let boxes = to_image_space(kept, &mapping, image.width(), image.height());

        debug!("Detected {} regions", boxes.len());
        Ok(boxes)
    }
}

/// Decode raw model output (layout `[1, 4 + classes, candidates]`, centers
/// and sizes in letterbox pixels) into scored corner boxes, dropping
/// candidates below the confidence threshold.
fn decode_candidates(shape: &[i64], data: &[f32], confidence_threshold: f32) -> Vec<BoundingBox> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        warn!("Unexpected detector output shape {:?}", shape);
        return Vec::new();
    }

    let attrs = shape[1] as usize;
    let count = shape[2] as usize;
    let classes = attrs - 4;

    if data.len() < attrs * count {
        warn!(
            "Detector output carries {} values, expected {}",
            data.len(),
            attrs * count
        );
        return Vec::new();
    }

    let mut boxes = Vec::new();
    for i in 0..count {
        let mut score = 0.0f32;
        for c in 0..classes {
            score = score.max(data[(4 + c) * count + i]);
        }
        if score < confidence_threshold {
            continue;
        }

        let cx = data[i];
        let cy = data[count + i];
        let w = data[2 * count + i];
        let h = data[3 * count + i];
        if w <= 0.0 || h <= 0.0 {
            continue;
        }

        boxes.push(BoundingBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score: score.clamp(0.0, 1.0),
        });
    }

    boxes
}

/// Greedy non-maximum suppression: keep boxes in descending score order,
/// dropping any that overlap an already-kept box beyond the IoU threshold.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }

    kept
}

/// Project letterbox-space boxes back into source image space, clamped to
/// the image rectangle. Boxes that collapse to zero area are dropped.
fn to_image_space(
    boxes: Vec<BoundingBox>,
    mapping: &LetterboxMapping,
    img_w: u32,
    img_h: u32,
) -> Vec<BoundingBox> {
    boxes
        .into_iter()
        .filter_map(|b| {
            let (x1, y1) = mapping.to_image(b.x1, b.y1);
            let (x2, y2) = mapping.to_image(b.x2, b.y2);

            let x1 = x1.clamp(0.0, img_w as f32);
            let y1 = y1.clamp(0.0, img_h as f32);
            let x2 = x2.clamp(0.0, img_w as f32);
            let y2 = y2.clamp(0.0, img_h as f32);

            (x2 > x1 && y2 > y1).then_some(BoundingBox {
                x1,
                y1,
                x2,
                y2,
                score: b.score,
            })
        })
        .collect()
}
