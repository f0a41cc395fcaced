//! Model Input Preparation
//!
//! Resizing, normalization, and tensor conversion for the detection and
//! recognition models.

use image::RgbImage;
use ndarray::{Array3, Array4};

/// Normalization constants for the recognition model.
/// The model expects: (pixel / 255.0 - 0.5) / 0.5 = pixel / 127.5 - 1.0
/// This maps [0, 255] -> [-1, 1]
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Fill value for letterbox padding (neutral gray).
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Mapping from letterboxed coordinates back to source image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct LetterboxMapping {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl LetterboxMapping {
    /// Map a point in letterbox space back into source image space.
    pub fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert an RGB image to an HWC f32 array scaled to 0-1.
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Bilinear resize of an HWC array.
fn resize_bilinear(image: &Array3<f32>, new_h: usize, new_w: usize) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));

    let scale_y = h as f32 / new_h as f32;
    let scale_x = w as f32 / new_w as f32;

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 * scale_y).min(h as f32 - 1.0);
            let src_x = (x as f32 * scale_x).min(w as f32 - 1.0);

            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Letterbox an image into a `target x target` square: resize preserving
/// aspect ratio, then pad with neutral gray, content centered.
///
/// Returns the padded image and the mapping needed to project detection
/// coordinates back into source image space.
pub fn letterbox(image: &Array3<f32>, target: u32) -> (Array3<f32>, LetterboxMapping) {
    let (h, w, c) = image.dim();
    let target = target as usize;

    let scale = (target as f32 / w as f32).min(target as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as usize).clamp(1, target);
    let new_h = ((h as f32 * scale).round() as usize).clamp(1, target);

    let resized = resize_bilinear(image, new_h, new_w);

    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut padded = Array3::<f32>::from_elem((target, target, c), LETTERBOX_FILL);
    for y in 0..new_h {
        for x in 0..new_w {
            for ch in 0..c {
                padded[[pad_y + y, pad_x + x, ch]] = resized[[y, x, ch]];
            }
        }
    }

    let mapping = LetterboxMapping {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };

    (padded, mapping)
}

/// Resize image for the recognition model (fixed height, variable width).
pub fn resize_for_recognition(image: &Array3<f32>, target_height: u32, max_width: u32) -> Array3<f32> {
    let (h, w, _) = image.dim();

    let scale = target_height as f32 / h as f32;
    let new_w = (((w as f32 * scale) as u32).clamp(1, max_width)) as usize;

    resize_bilinear(image, target_height as usize, new_w)
}
