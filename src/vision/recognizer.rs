//! Text Recognition Capability
//!
//! A CRNN-style (PaddleOCR) ONNX recognizer behind the `TextRecognizer`
//! seam: fixed-height input, greedy CTC decoding against a character
//! dictionary, ordered text fragments out.

use anyhow::{Context, Result};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use tracing::debug;

use crate::config::RecognitionSettings;
use crate::vision::models::OnnxSession;
use crate::vision::preprocess::{self, REC_MEAN, REC_STD};

/// Text-recognition capability: one pass over a region crop returning the
/// recognized text fragments in reading order.
///
/// Absence of text is `Ok(vec![])`, never an error. Instances are
/// constructed once at startup and shared across sessions; calls are
/// stateless and must be safe to issue concurrently.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<String>>;
}

/// CRNN ONNX recognizer with a character dictionary.
///
/// The underlying session is serialized behind a mutex so one instance can
/// be shared by concurrently running sessions.
pub struct OnnxRecognizer {
    session: Mutex<OnnxSession>,
    dictionary: Vec<String>,
    settings: RecognitionSettings,
}

impl OnnxRecognizer {
    /// Load the recognition model and its character dictionary.
    pub fn new(model_path: &Path, dict_path: &Path, settings: RecognitionSettings) -> Result<Self> {
        let dictionary = load_dictionary(dict_path)?;
        let session = OnnxSession::new(model_path)?;

        Ok(Self {
            session: Mutex::new(session),
            dictionary,
            settings,
        })
    }
}

impl TextRecognizer for OnnxRecognizer {
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<String>> {
        let rgb = preprocess::rgb_to_f32(crop);
        let resized = preprocess::resize_for_recognition(
            &rgb,
            self.settings.input_height,
            self.settings.max_input_width,
        );
        let normalized = preprocess::normalize(&resized, &REC_MEAN, &REC_STD);
        let tensor = preprocess::hwc_to_nchw(&normalized);

        let (shape, data) = self.session.lock().run(tensor)?;

        let text = ctc_greedy_decode(&shape, &data, &self.dictionary);
        debug!("Recognized {:?} in {}x{} crop", text, crop.width(), crop.height());

        if text.trim().is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![text])
        }
    }
}

/// Load the character dictionary: one entry per line, order defining the
/// model's class indices (offset by one for the CTC blank).
fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read character dictionary {:?}", path))?;

    let dictionary: Vec<String> = content.lines().map(|line| line.to_string()).collect();
    if dictionary.is_empty() {
        anyhow::bail!("Character dictionary {:?} is empty", path);
    }

    Ok(dictionary)
}

/// Greedy CTC decode of a `[1, steps, classes]` probability tensor.
///
/// Class 0 is the CTC blank; class `i > 0` maps to `dictionary[i - 1]`, and
/// indices past the dictionary decode as a space (the space class some
/// recognition models append). Repeated classes collapse unless separated
/// by a blank.
fn ctc_greedy_decode(shape: &[i64], data: &[f32], dictionary: &[String]) -> String {
    if shape.len() != 3 || shape[0] != 1 {
        return String::new();
    }

    let steps = shape[1] as usize;
    let classes = shape[2] as usize;
    if classes < 2 || data.len() < steps * classes {
        return String::new();
    }

    let mut text = String::new();
    let mut previous = 0usize;

    for t in 0..steps {
        let row = &data[t * classes..(t + 1) * classes];
        let mut best = 0usize;
        for (c, &p) in row.iter().enumerate() {
            if p > row[best] {
                best = c;
            }
        }

        if best != 0 && best != previous {
            match dictionary.get(best - 1) {
                Some(entry) => text.push_str(entry),
                None => text.push(' '),
            }
        }
        previous = best;
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dict() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    /// Build a `[1, steps, classes]` tensor that argmaxes to `indices`.
    fn one_hot(indices: &[usize], classes: usize) -> (Vec<i64>, Vec<f32>) {
        let mut data = vec![0.0f32; indices.len() * classes];
        for (t, &c) in indices.iter().enumerate() {
            data[t * classes + c] = 1.0;
        }
        (vec![1, indices.len() as i64, classes as i64], data)
    }

    #[test]
    fn test_ctc_collapses_repeats() {
        // blank, a, a, blank, b -> "ab"
        let (shape, data) = one_hot(&[0, 1, 1, 0, 2], 4);
        assert_eq!(ctc_greedy_decode(&shape, &data, &dict()), "ab");
    }

    #[test]
    fn test_ctc_blank_separates_repeats() {
        // a, blank, a -> "aa"
        let (shape, data) = one_hot(&[1, 0, 1], 4);
        assert_eq!(ctc_greedy_decode(&shape, &data, &dict()), "aa");
    }

    #[test]
    fn test_ctc_all_blank_is_empty() {
        let (shape, data) = one_hot(&[0, 0, 0, 0], 4);
        assert_eq!(ctc_greedy_decode(&shape, &data, &dict()), "");
    }

    #[test]
    fn test_ctc_out_of_dictionary_is_space() {
        // Index 4 is one past the 3-entry dictionary: decodes as a space
        let (shape, data) = one_hot(&[1, 4, 2], 5);
        assert_eq!(ctc_greedy_decode(&shape, &data, &dict()), "a b");
    }

    #[test]
    fn test_ctc_rejects_unexpected_shape() {
        assert_eq!(ctc_greedy_decode(&[1, 4], &[0.0; 4], &dict()), "");
        assert_eq!(ctc_greedy_decode(&[1, 3, 10], &[0.0; 4], &dict()), "");
    }

    #[test]
    fn test_load_dictionary() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();
        writeln!(file, "y").unwrap();

        let dictionary = load_dictionary(file.path()).unwrap();
        assert_eq!(dictionary, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_load_dictionary_rejects_empty() {
        let file = NamedTempFile::new().unwrap();
        assert!(load_dictionary(file.path()).is_err());
    }
}
