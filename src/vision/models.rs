//! Model Acquisition and ONNX Sessions
//!
//! Resolves, downloads, and loads the detection model, the recognition
//! model, and the recognition character dictionary.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ModelSettings;

/// Files the service needs before it can serve frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Region detection model
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelKind {
    /// Get the filename for this model kind
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::Detection => "det.onnx",
            ModelKind::Recognition => "rec.onnx",
            ModelKind::Dictionary => "dict.txt",
        }
    }

    /// Display name for log and error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Detection => "Region Detection",
            ModelKind::Recognition => "Text Recognition",
            ModelKind::Dictionary => "Character Dictionary",
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::Detection => (1_000_000, 300_000_000),
            ModelKind::Recognition => (1_000_000, 100_000_000),
            ModelKind::Dictionary => (100, 1_000_000),
        }
    }
}

/// Resolves model files on disk and fetches missing ones at startup.
pub struct ModelStore {
    models_dir: PathBuf,
    settings: ModelSettings,
}

impl ModelStore {
    /// Create a store rooted at the configured directory, or the data
    /// directory when none is configured.
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let models_dir = match &settings.dir {
            Some(dir) => dir.clone(),
            None => crate::config::get_data_dir()?.join("models"),
        };
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;

        Ok(Self {
            models_dir,
            settings: settings.clone(),
        })
    }

    /// Get the path to a specific model file
    pub fn path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Check whether a model file is present with a plausible size.
    pub fn is_available(&self, kind: ModelKind) -> bool {
        let path = self.path(kind);
        if !path.exists() {
            return false;
        }

        if let Ok(metadata) = std::fs::metadata(&path) {
            let (min, max) = kind.expected_size_range();
            let size = metadata.len();
            size >= min && size <= max
        } else {
            false
        }
    }

    /// Make sure a model file is present, downloading it if a URL is
    /// configured. Returns the path to the file.
    pub fn ensure(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.path(kind);

        if self.is_available(kind) {
            info!("{} file available at {:?}", kind.display_name(), path);
            return Ok(path);
        }

        let url = self.download_url(kind).with_context(|| {
            format!(
                "{} file missing at {:?} and no download URL configured",
                kind.display_name(),
                path
            )
        })?;

        if std::env::var("STREAMSIGHT_OFFLINE").is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download {}. Please fetch {} manually and place it at {:?}",
                kind.display_name(),
                url,
                path
            );
        }

        info!("Downloading {} from {}", kind.display_name(), url);

        let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(self.download_file(&url, &path))?;

        if !self.is_available(kind) {
            anyhow::bail!(
                "Download of {} completed but the file failed verification",
                kind.display_name()
            );
        }

        info!("Successfully downloaded {}", kind.display_name());
        Ok(path)
    }

    fn download_url(&self, kind: ModelKind) -> Option<String> {
        match kind {
            ModelKind::Detection => self.settings.detection_url.clone(),
            ModelKind::Recognition => self.settings.recognition_url.clone(),
            ModelKind::Dictionary => self.settings.dictionary_url.clone(),
        }
    }

    /// Stream one file to disk, hashing as it arrives.
    async fn download_file(&self, url: &str, path: &Path) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        // Download into a temp file, then move into place
        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;

            file.write_all(&chunk).context("Failed to write to temp file")?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        info!("Downloaded {} bytes, sha256 {}", downloaded, hash);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Model has no inputs"))?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Model has no outputs"))?;

        info!("Model loaded. Input: {}, Output: {}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Run one inference pass on an NCHW batch and extract the first output
    /// tensor as an owned (shape, data) pair.
    pub fn run(&mut self, input: Array4<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
        let (n, c, h, w) = input.dim();
        let (data, _) = input.into_raw_vec_and_offset();
        let tensor = ort::value::Tensor::from_array(([n, c, h, w], data))
            .context("Failed to build input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("Inference failed")?;

        let value = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| anyhow::anyhow!("Model output '{}' missing", self.output_name))?;

        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        Ok((shape.iter().map(|&d| d).collect(), data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ModelStore {
        let settings = ModelSettings {
            dir: Some(dir.path().to_path_buf()),
            detection_url: None,
            recognition_url: None,
            dictionary_url: None,
        };
        ModelStore::new(&settings).unwrap()
    }

    #[test]
    fn test_model_kind_filenames() {
        assert_eq!(ModelKind::Detection.filename(), "det.onnx");
        assert_eq!(ModelKind::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelKind::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(!store.is_available(ModelKind::Detection));
    }

    #[test]
    fn test_undersized_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        std::fs::write(store.path(ModelKind::Recognition), b"stub").unwrap();
        assert!(!store.is_available(ModelKind::Recognition));
    }

    #[test]
    fn test_dictionary_availability() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        std::fs::write(store.path(ModelKind::Dictionary), "a\nb\nc\n".repeat(100)).unwrap();
        assert!(store.is_available(ModelKind::Dictionary));
    }

    #[test]
    fn test_ensure_without_url_reports_missing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let err = store.ensure(ModelKind::Detection).unwrap_err();
        assert!(err.to_string().contains("no download URL"));
    }
}
