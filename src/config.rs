//! Configuration types for the segmentation pipeline

use crate::error::{Result, SegmentationError};
use crate::inference::BackendType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the weights cache root
pub const CACHE_DIR_ENV: &str = "VIDEO_BGREMOVE_CACHE_DIR";
/// Environment variable overriding the ffmpeg binary
pub const FFMPEG_ENV: &str = "VIDEO_BGREMOVE_FFMPEG";
/// Environment variable overriding the ffprobe binary
pub const FFPROBE_ENV: &str = "VIDEO_BGREMOVE_FFPROBE";

const DEFAULT_ENCODER_URL: &str =
    "https://huggingface.co/Acly/MobileSAM/resolve/main/mobile_sam_image_encoder.onnx";
const DEFAULT_DECODER_URL: &str =
    "https://huggingface.co/Acly/MobileSAM/resolve/main/sam_mask_decoder_multi.onnx";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU / Neural Engine acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// External media tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Per-invocation limit; expiry counts as a tool failure
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            timeout_secs: 600,
        }
    }
}

impl ToolConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A single remote weight file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub url: String,
    /// Lower-case hex SHA-256; verified after download and on every reuse when set
    pub sha256: Option<String>,
}

impl ModelAsset {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, sha256: S) -> Self {
        self.sha256 = Some(sha256.into().to_lowercase());
        self
    }

    /// File name the asset is cached under (last URL path segment)
    #[must_use]
    pub fn file_name(&self) -> String {
        self.url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("model.onnx")
            .to_string()
    }
}

/// Model weight locations: an image encoder and a prompt/mask decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Cache root; `None` resolves to the XDG cache directory
    pub cache_dir: Option<PathBuf>,
    pub encoder: ModelAsset,
    pub decoder: ModelAsset,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            encoder: ModelAsset::new(DEFAULT_ENCODER_URL),
            decoder: ModelAsset::new(DEFAULT_DECODER_URL),
        }
    }
}

/// Configuration for segmentation jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inference backend for the matting engine
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    pub tools: ToolConfig,

    pub weights: WeightsConfig,

    /// Log progress every N frames
    pub progress_interval: usize,

    /// Keep the work directory of a failed job for diagnosis
    pub retain_workdir_on_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            tools: ToolConfig::default(),
            weights: WeightsConfig::default(),
            progress_interval: 10,
            retain_workdir_on_failure: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use video_bgremove::{ExecutionProvider, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .tool_timeout_secs(120)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.tools.timeout_secs, 120);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a JSON configuration file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON or failed validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SegmentationError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SegmentationError::invalid_config(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VIDEO_BGREMOVE_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(cache_dir) = std::env::var(CACHE_DIR_ENV) {
            self.weights.cache_dir = Some(PathBuf::from(cache_dir).join("models"));
        }
        if let Ok(ffmpeg) = std::env::var(FFMPEG_ENV) {
            self.tools.ffmpeg_path = PathBuf::from(ffmpeg);
        }
        if let Ok(ffprobe) = std::env::var(FFPROBE_ENV) {
            self.tools.ffprobe_path = PathBuf::from(ffprobe);
        }
        self
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero tool timeout or progress interval
    /// - Non-HTTPS weight URLs
    /// - Malformed SHA-256 digests
    pub fn validate(&self) -> Result<()> {
        if self.tools.timeout_secs == 0 {
            return Err(SegmentationError::invalid_config(
                "Tool timeout must be at least 1 second",
            ));
        }

        if self.progress_interval == 0 {
            return Err(SegmentationError::invalid_config(
                "Progress interval must be at least 1 frame",
            ));
        }

        for (role, asset) in [
            ("encoder", &self.weights.encoder),
            ("decoder", &self.weights.decoder),
        ] {
            if !asset.url.starts_with("https://") {
                return Err(SegmentationError::invalid_config(format!(
                    "Unsupported {} URL '{}': only https:// sources are supported",
                    role, asset.url
                )));
            }
            if let Some(ref digest) = asset.sha256 {
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(SegmentationError::invalid_config(format!(
                        "Invalid SHA-256 for {} weights: '{}'",
                        role, digest
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn ffmpeg_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.tools.ffmpeg_path = path.into();
        self
    }

    #[must_use]
    pub fn ffprobe_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.tools.ffprobe_path = path.into();
        self
    }

    #[must_use]
    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tools.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.weights.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn encoder_weights(mut self, asset: ModelAsset) -> Self {
        self.config.weights.encoder = asset;
        self
    }

    #[must_use]
    pub fn decoder_weights(mut self, asset: ModelAsset) -> Self {
        self.config.weights.decoder = asset;
        self
    }

    #[must_use]
    pub fn progress_interval(mut self, frames: usize) -> Self {
        self.config.progress_interval = frames;
        self
    }

    #[must_use]
    pub fn retain_workdir_on_failure(mut self, retain: bool) -> Self {
        self.config.retain_workdir_on_failure = retain;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation failures, see [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
