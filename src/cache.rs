//! Weights cache management for downloaded models
//!
//! Weights live in an id-namespaced directory under an XDG-compliant cache
//! root, so unrelated model sources never share files and presence is an
//! explicit check rather than an assumption.

use crate::config::ModelAsset;
use crate::error::{Result, SegmentationError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Weights cache manager
#[derive(Debug, Clone)]
pub struct WeightsCache {
    cache_dir: PathBuf,
}

impl WeightsCache {
    /// Create a cache rooted at `cache_dir`, or at the default location when `None`.
    ///
    /// Default location:
    /// - `$VIDEO_BGREMOVE_CACHE_DIR/models` when set
    /// - otherwise `~/.cache/video-bgremove/models/` (platform equivalent)
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => Self::default_cache_dir()?,
        };

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                SegmentationError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }

        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(crate::config::CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                SegmentationError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    crate::config::CACHE_DIR_ENV
                ))
            })?
            .join("video-bgremove")
            .join("models"))
    }

    /// Generate a cache-safe model ID from a URL
    ///
    /// `HuggingFace` URLs map to `user--repo`; anything else to a hash prefix.
    ///
    /// # Examples
    /// ```
    /// use video_bgremove::cache::WeightsCache;
    ///
    /// let id = WeightsCache::url_to_model_id(
    ///     "https://huggingface.co/Acly/MobileSAM/resolve/main/sam_mask_decoder_multi.onnx",
    /// );
    /// assert_eq!(id, "Acly--MobileSAM");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo_path) = url.strip_prefix(prefix) {
            let parts: Vec<&str> = repo_path.split('/').take(2).collect();
            if let [user, repo] = parts.as_slice() {
                if !user.is_empty() && !repo.is_empty() {
                    return format!("{}--{}", user, repo);
                }
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash_string = format!("url-{:x}", hasher.finalize());
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Root directory of the cache
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local path an asset is (or will be) cached at
    #[must_use]
    pub fn asset_path(&self, asset: &ModelAsset) -> PathBuf {
        self.cache_dir
            .join(Self::url_to_model_id(&asset.url))
            .join(asset.file_name())
    }

    /// Check whether an asset is present and, when a digest is configured, intact
    ///
    /// # Errors
    /// - I/O errors while hashing an existing file
    pub fn is_cached(&self, asset: &ModelAsset) -> Result<bool> {
        let path = self.asset_path(asset);
        if !path.is_file() {
            return Ok(false);
        }

        match asset.sha256 {
            Some(ref expected) => verify_sha256(&path, expected),
            None => Ok(true),
        }
    }

    /// Remove a cached asset, e.g. after an integrity failure
    ///
    /// # Errors
    /// - I/O errors while deleting
    pub fn evict(&self, asset: &ModelAsset) -> Result<()> {
        let path = self.asset_path(asset);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| SegmentationError::file_io_error("remove cached weights", &path, &e))?;
        }
        Ok(())
    }
}

/// Hash a file with SHA-256 and compare against a hex digest
///
/// # Errors
/// - File cannot be read
pub fn verify_sha256(path: &Path, expected: &str) -> Result<bool> {
    let mut file = fs::File::open(path)
        .map_err(|e| SegmentationError::file_io_error("read file for verification", path, &e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| SegmentationError::file_io_error("read file for verification", path, &e))?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or(&[]));
    }

    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}
