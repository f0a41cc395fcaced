//! Region Extraction
//!
//! Crops one detected bounding box out of a frame, clipped to image bounds.

use image::RgbImage;

use crate::vision::BoundingBox;

/// Extract the sub-image for `bbox`, truncating its coordinates to integers
/// and clipping them to `[0, width) x [0, height)`.
///
/// Returns `None` when the clipped rectangle has zero width or height; the
/// caller must skip recognition for that region entirely rather than invoke
/// it on an empty crop.
pub fn crop_region(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (img_w, img_h) = image.dimensions();

    // Truncate toward zero, then clip to the image rectangle
    let x1 = (bbox.x1 as i64).clamp(0, img_w as i64) as u32;
    let y1 = (bbox.y1 as i64).clamp(0, img_h as i64) as u32;
    let x2 = (bbox.x2 as i64).clamp(0, img_w as i64) as u32;
    let y2 = (bbox.y2 as i64).clamp(0, img_h as i64) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}
