//! Frame Pipeline
//!
//! Decode -> detect -> (crop -> recognize)* -> aggregate. Every per-frame
//! failure is absorbed here so nothing can reach the session loop: a decode
//! or detection failure drops the whole frame, an empty region excludes
//! only that region, and recognition failures degrade to empty text.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::protocol::{Detection, FrameResponse};
use crate::vision::{decoder, region, RegionDetector, TextRecognizer};

/// Per-frame orchestrator over the two shared capability instances.
pub struct FramePipeline {
    detector: Arc<dyn RegionDetector>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl FramePipeline {
    /// Wire the pipeline to the process-wide capability singletons.
    pub fn new(detector: Arc<dyn RegionDetector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Process one frame into a response envelope.
    ///
    /// `None` means the frame was silently dropped (undecodable image or a
    /// failed detection pass); the session sends nothing and awaits the
    /// next request.
    pub fn process(
        &self,
        image_bytes: &[u8],
        timestamp: Option<serde_json::Value>,
    ) -> Option<FrameResponse> {
        let frame = decoder::decode_frame(image_bytes)?;

        let boxes = match self.detector.detect(&frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("Dropping frame: region detection failed: {:#}", e);
                return None;
            }
        };

        let mut detections = Vec::with_capacity(boxes.len());
        for bbox in &boxes {
            // A box whose clipped crop is empty contributes nothing, unlike
            // a recognizable region with no text, which still gets a record.
            let Some(crop) = region::crop_region(&frame, bbox) else {
                debug!("Excluding region with empty crop at ({}, {})", bbox.x1, bbox.y1);
                continue;
            };

            let fragments = match self.recognizer.recognize(&crop) {
                Ok(fragments) => fragments,
                Err(e) => {
                    warn!("Treating failed recognition as empty text: {:#}", e);
                    Vec::new()
                }
            };

            detections.push(Detection {
                x: bbox.x1,
                y: bbox.y1,
                w: bbox.width(),
                h: bbox.height(),
                score: bbox.score,
                text: join_fragments(&fragments),
            });
        }

        let with_text = detections.iter().filter(|d| !d.text.is_empty()).count();
        debug!("Frame processed: {} detections, {} with text", detections.len(), with_text);

        Some(FrameResponse::assemble(timestamp, detections))
    }
}

/// Concatenate recognition fragments with a single space separator, in the
/// capability's order, trimmed of surrounding whitespace.
fn join_fragments(fragments: &[String]) -> String {
    fragments.join(" ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io::Cursor;

    use crate::vision::BoundingBox;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2, score }
    }

    /// Detector returning a fixed box list for every frame.
    struct StaticDetector {
        boxes: Vec<BoundingBox>,
    }

    impl RegionDetector for StaticDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>> {
            Ok(self.boxes.clone())
        }
    }

    struct FailingDetector;

    impl RegionDetector for FailingDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>> {
            anyhow::bail!("inference backend fell over")
        }
    }

    /// Recognizer handing out scripted fragment lists, counting its calls.
    struct ScriptedRecognizer {
        outputs: Mutex<VecDeque<Vec<String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedRecognizer {
        fn new(outputs: &[&[&str]]) -> Self {
            Self {
                outputs: Mutex::new(
                    outputs
                        .iter()
                        .map(|fragments| fragments.iter().map(|s| s.to_string()).collect())
                        .collect(),
                ),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock()
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, _crop: &RgbImage) -> Result<Vec<String>> {
            *self.calls.lock() += 1;
            Ok(self.outputs.lock().pop_front().unwrap_or_default())
        }
    }

    fn pipeline_with(
        boxes: Vec<BoundingBox>,
        recognizer: Arc<ScriptedRecognizer>,
    ) -> FramePipeline {
        FramePipeline::new(Arc::new(StaticDetector { boxes }), recognizer)
    }

    #[test]
    fn test_no_boxes_yields_empty_detections() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[]));
        let pipeline = pipeline_with(vec![], recognizer.clone());

        let response = pipeline.process(&png_bytes(1, 1), Some(json!(1))).unwrap();

        assert_eq!(response.timestamp, Some(json!(1)));
        assert!(response.detections.is_empty());
        assert_eq!(recognizer.call_count(), 0);
    }

    #[test]
    fn test_single_box_record_geometry() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&["ABC"]]));
        let pipeline = pipeline_with(vec![bbox(10.0, 10.0, 50.0, 60.0, 0.9)], recognizer);

        let response = pipeline.process(&png_bytes(100, 100), Some(json!(7))).unwrap();

        assert_eq!(response.detections.len(), 1);
        let record = &response.detections[0];
        assert_eq!(record.x, 10.0);
        assert_eq!(record.y, 10.0);
        assert_eq!(record.w, 40.0);
        assert_eq!(record.h, 50.0);
        assert_eq!(record.score, 0.9);
        assert_eq!(record.text, "ABC");
    }

    #[test]
    fn test_undecodable_image_drops_frame() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[]));
        let pipeline = pipeline_with(vec![bbox(0.0, 0.0, 1.0, 1.0, 0.5)], recognizer);

        assert!(pipeline.process(b"not an image", Some(json!(1))).is_none());
        assert!(pipeline.process(&[], None).is_none());
    }

    #[test]
    fn test_detector_failure_drops_frame() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&["never"]]));
        let pipeline = FramePipeline::new(Arc::new(FailingDetector), recognizer.clone());

        assert!(pipeline.process(&png_bytes(10, 10), Some(json!(1))).is_none());
        assert_eq!(recognizer.call_count(), 0);
    }

    #[test]
    fn test_empty_region_excluded_and_never_recognized() {
        // Second box lies fully outside the 20x20 frame
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&["in"], &["out"]]));
        let pipeline = pipeline_with(
            vec![
                bbox(2.0, 2.0, 10.0, 10.0, 0.8),
                bbox(30.0, 30.0, 40.0, 40.0, 0.9),
            ],
            recognizer.clone(),
        );

        let response = pipeline.process(&png_bytes(20, 20), None).unwrap();

        // The out-of-bounds box is absent entirely, not present with empty text
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].text, "in");
        assert_eq!(recognizer.call_count(), 1);
    }

    #[test]
    fn test_empty_recognition_keeps_record_with_empty_text() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&[]]));
        let pipeline = pipeline_with(vec![bbox(2.0, 2.0, 10.0, 10.0, 0.8)], recognizer);

        let response = pipeline.process(&png_bytes(20, 20), None).unwrap();

        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].text, "");
    }

    #[test]
    fn test_overlapping_boxes_stay_independent_and_ordered() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&["first"], &["second"]]));
        let pipeline = pipeline_with(
            vec![
                bbox(2.0, 2.0, 12.0, 12.0, 0.6),
                bbox(4.0, 4.0, 14.0, 14.0, 0.9),
            ],
            recognizer,
        );

        let response = pipeline.process(&png_bytes(20, 20), None).unwrap();

        assert_eq!(response.detections.len(), 2);
        assert_eq!(response.detections[0].text, "first");
        assert_eq!(response.detections[1].text, "second");
    }

    #[test]
    fn test_fragments_join_with_single_space() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[&[" LIMIT ", "50"]]));
        let pipeline = pipeline_with(vec![bbox(2.0, 2.0, 10.0, 10.0, 0.8)], recognizer);

        let response = pipeline.process(&png_bytes(20, 20), None).unwrap();

        assert_eq!(response.detections[0].text, "LIMIT  50");
    }

    #[test]
    fn test_timestamp_absence_is_preserved() {
        let recognizer = Arc::new(ScriptedRecognizer::new(&[]));
        let pipeline = pipeline_with(vec![], recognizer);

        let response = pipeline.process(&png_bytes(1, 1), None).unwrap();
        assert!(response.timestamp.is_none());
    }

    #[test]
    fn test_join_fragments() {
        assert_eq!(join_fragments(&[]), "");
        assert_eq!(join_fragments(&["a".to_string()]), "a");
        assert_eq!(join_fragments(&["a".to_string(), "b".to_string()]), "a b");
        // Surrounding whitespace is trimmed after joining
        assert_eq!(join_fragments(&[" a".to_string(), "b ".to_string()]), "a b");
    }
}
