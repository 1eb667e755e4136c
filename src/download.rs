//! Weight downloading with download-once semantics
//!
//! Weights are streamed into a temporary file next to their cache location
//! and renamed into place only after a complete (and, when a digest is
//! configured, verified) download, so a crashed download never leaves a
//! truncated file that later jobs would silently reuse.

use crate::cache::{verify_sha256, WeightsCache};
use crate::config::{ModelAsset, WeightsConfig};
use crate::error::{Result, SegmentationError};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Local paths of the two model graphs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Weight downloader backed by a [`WeightsCache`]
#[derive(Debug, Clone)]
pub struct WeightsDownloader {
    client: Client,
    cache: WeightsCache,
    show_progress: bool,
}

impl WeightsDownloader {
    /// Create a new downloader
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: WeightsCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| SegmentationError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            show_progress: false,
        })
    }

    /// Render a progress bar while downloading (CLI builds only)
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &WeightsCache {
        &self.cache
    }

    /// Make sure both model graphs are present locally
    ///
    /// # Errors
    /// See [`WeightsDownloader::ensure`]
    pub async fn ensure_model(&self, weights: &WeightsConfig) -> Result<ModelPaths> {
        Ok(ModelPaths {
            encoder: self.ensure(&weights.encoder).await?,
            decoder: self.ensure(&weights.decoder).await?,
        })
    }

    /// Return the cached path of `asset`, downloading it first if absent.
    ///
    /// A cached file whose digest no longer matches is evicted and fetched again.
    ///
    /// # Errors
    /// - Network errors during download
    /// - File system errors during caching
    /// - Digest mismatch on the freshly downloaded file
    pub async fn ensure(&self, asset: &ModelAsset) -> Result<PathBuf> {
        let final_path = self.cache.asset_path(asset);

        if self.cache.is_cached(asset)? {
            log::debug!("Using cached weights: {}", final_path.display());
            return Ok(final_path);
        }
        if final_path.exists() {
            log::warn!(
                "Cached weights at {} failed verification, re-downloading",
                final_path.display()
            );
            self.cache.evict(asset)?;
        }

        let parent = final_path.parent().ok_or_else(|| {
            SegmentationError::internal(format!(
                "Weights path has no parent: {}",
                final_path.display()
            ))
        })?;
        fs::create_dir_all(parent)
            .map_err(|e| SegmentationError::file_io_error("create weights directory", parent, &e))?;

        let temp_path = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(parent)
            .map_err(|e| SegmentationError::file_io_error("create temp file", parent, &e))?
            .into_temp_path();

        log::info!("Downloading weights from: {}", asset.url);
        let progress = self.create_progress_indicator();
        progress.set_message(format!("Downloading {}", asset.file_name()));

        if let Err(e) = self.download_file(&asset.url, &temp_path, &progress).await {
            progress.finish_with_message("❌ Download failed".to_string());
            return Err(e);
        }

        if let Some(ref expected) = asset.sha256 {
            if !verify_sha256(&temp_path, expected)? {
                progress.finish_with_message("❌ Checksum mismatch".to_string());
                return Err(SegmentationError::model(format!(
                    "Downloaded weights from {} do not match SHA-256 {}",
                    asset.url, expected
                )));
            }
        }

        temp_path.persist(&final_path).map_err(|e| {
            SegmentationError::file_io_error("move downloaded weights to cache", &final_path, &e.error)
        })?;

        progress.finish_with_message(format!("✅ Downloaded {}", asset.file_name()));
        log::info!("Cached weights at {}", final_path.display());
        Ok(final_path)
    }

    fn create_progress_indicator(&self) -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            if self.show_progress {
                let pb = ProgressBar::new(100);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return ProgressIndicator::Indicatif(pb);
            }
        }
        ProgressIndicator::NoOp
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SegmentationError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(SegmentationError::network_error(
                format!("HTTP error for {}", url),
                response.status(),
            ));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| SegmentationError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| SegmentationError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| SegmentationError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!(
                    "Downloaded {:.1} MB",
                    downloaded as f64 / 1_024_000.0
                ));
            }
        }

        file.flush()
            .await
            .map_err(|e| SegmentationError::file_io_error("flush file", local_path, &e))?;

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }
}
