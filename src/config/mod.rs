//! Service Configuration
//!
//! Server, inference, and model-acquisition settings stored in TOML format.
//! The inference thresholds are configuration constants, never per-request
//! parameters.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Region detection settings
    pub detection: DetectionSettings,
    /// Text recognition settings
    pub recognition: RecognitionSettings,
    /// Model acquisition settings
    pub models: ModelSettings,
}

/// WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind on
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Fixed inference parameters for the region-detection model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Square input resolution the frame is letterboxed to
    pub input_size: u32,
    /// Minimum confidence for a candidate box to survive
    pub confidence_threshold: f32,
    /// IoU threshold for overlap suppression
    pub iou_threshold: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            input_size: 512,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Fixed inference parameters for the text-recognition model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// Input height the crop is resized to (typically 32 or 48)
    pub input_height: u32,
    /// Maximum input width after resizing
    pub max_input_width: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            input_height: 48,
            max_input_width: 640,
        }
    }
}

/// Where model files live and where missing ones are fetched from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Directory holding the model files; defaults to the data directory
    pub dir: Option<PathBuf>,
    /// Download URL for the detection model; the detection weights are
    /// deployment-specific, so there is no default
    pub detection_url: Option<String>,
    /// Download URL for the recognition model
    pub recognition_url: Option<String>,
    /// Download URL for the recognition character dictionary
    pub dictionary_url: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: None,
            detection_url: None,
            recognition_url: Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
                    .to_string(),
            ),
            dictionary_url: Some(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
                    .to_string(),
            ),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("io", "streamsight", "streamsight")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("io", "streamsight", "streamsight")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check server defaults
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);

        // Check detection defaults (the fixed inference parameters)
        assert_eq!(config.detection.input_size, 512);
        assert!((config.detection.confidence_threshold - 0.25).abs() < 1e-6);
        assert!((config.detection.iou_threshold - 0.45).abs() < 1e-6);

        // Check recognition defaults
        assert_eq!(config.recognition.input_height, 48);
        assert_eq!(config.recognition.max_input_width, 640);

        // Check model defaults
        assert!(config.models.dir.is_none());
        assert!(config.models.detection_url.is_none());
        assert!(config.models.recognition_url.is_some());
        assert!(config.models.dictionary_url.is_some());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        // Serialize to TOML
        let toml_str = toml::to_string_pretty(&config).unwrap();

        // Deserialize back
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        // Verify values match
        assert_eq!(config.server.host, parsed.server.host);
        assert_eq!(config.server.port, parsed.server.port);
        assert_eq!(config.detection.input_size, parsed.detection.input_size);
        assert_eq!(config.recognition.input_height, parsed.recognition.input_height);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.server.port = 9100;
        config.detection.confidence_threshold = 0.5;
        config.models.dir = Some(PathBuf::from("/opt/models"));

        // Serialize and deserialize
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.server.port, 9100);
        assert!((parsed.detection.confidence_threshold - 0.5).abs() < 1e-6);
        assert_eq!(parsed.models.dir, Some(PathBuf::from("/opt/models")));
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();

        // Create a temporary file
        let temp_file = NamedTempFile::new().unwrap();

        // Save config
        save_config(&config, temp_file.path()).unwrap();

        // Load config
        let loaded = load_config(temp_file.path()).unwrap();

        // Verify
        assert_eq!(config.server.port, loaded.server.port);
        assert_eq!(config.detection.input_size, loaded.detection.input_size);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
