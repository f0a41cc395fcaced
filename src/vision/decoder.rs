//! Frame Decoding
//!
//! Turns the opaque encoded image bytes of a request into an RGB raster.

use image::RgbImage;
use tracing::debug;

/// Decode a compressed still image into an RGB raster.
///
/// Empty, corrupt, or unrecognized buffers produce `None`, never an error:
/// the caller drops the frame and the session continues with the next
/// request.
pub fn decode_frame(bytes: &[u8]) -> Option<RgbImage> {
    if bytes.is_empty() {
        debug!("Dropping frame with empty image payload");
        return None;
    }

    match image::load_from_memory(bytes) {
        Ok(decoded) => {
            let rgb = decoded.to_rgb8();
            if rgb.width() == 0 || rgb.height() == 0 {
                debug!("Dropping frame that decoded to an empty raster");
                return None;
            }
            Some(rgb)
        }
        Err(e) => {
            debug!("Dropping undecodable frame: {}", e);
            None
        }
    }
}
