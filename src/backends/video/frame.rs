//! Frame storage inside a job's working directory
//!
//! Raw frames and processed frames live in `raw/` and `processed/` as
//! `frame_<index>.png`, zero-padded to the digit count of the whole video's
//! frame total so lexicographic order equals temporal order.

use crate::error::{Result, SegmentationError};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RAW_DIR: &str = "raw";
const PROCESSED_DIR: &str = "processed";
const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

/// Digits needed to number every frame of a video with `total_frames` frames
#[must_use]
pub fn padding_width(total_frames: u64) -> usize {
    let mut digits = 1;
    let mut rest = total_frames / 10;
    while rest > 0 {
        digits += 1;
        rest /= 10;
    }
    digits
}

/// File name of frame `index`
#[must_use]
pub fn frame_file_name(index: usize, padding: usize) -> String {
    format!("{FRAME_PREFIX}{index:0padding$}.{FRAME_EXTENSION}")
}

/// printf-style pattern understood by ffmpeg's image2 muxer and demuxer
#[must_use]
pub fn frame_pattern(padding: usize) -> String {
    format!("{FRAME_PREFIX}%0{padding}d.{FRAME_EXTENSION}")
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(FRAME_EXTENSION)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FRAME_PREFIX))
}

/// Sorted frame files of a directory
///
/// # Errors
/// - Directory cannot be read
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in
        fs::read_dir(dir).map_err(|e| SegmentationError::file_io_error("list frames in", dir, &e))?
    {
        let path = entry
            .map_err(|e| SegmentationError::file_io_error("list frames in", dir, &e))?
            .path();
        if is_frame_file(&path) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Raw/processed layout of one job's working directory
#[derive(Debug, Clone)]
pub struct FrameStore {
    work_dir: PathBuf,
    padding: usize,
}

impl FrameStore {
    /// Recreate `work_dir` from scratch with empty `raw/` and `processed/`.
    ///
    /// Anything already at `work_dir` is deleted: a job id must be unique per
    /// invocation and leftovers of an orphaned run are never reused.
    ///
    /// # Errors
    /// - File system errors while deleting or creating directories
    pub fn prepare<P: Into<PathBuf>>(work_dir: P) -> Result<Self> {
        let work_dir = work_dir.into();

        if work_dir.exists() {
            log::warn!("Removing stale work directory {}", work_dir.display());
            fs::remove_dir_all(&work_dir).map_err(|e| {
                SegmentationError::file_io_error("remove stale work directory", &work_dir, &e)
            })?;
        }

        for sub in [RAW_DIR, PROCESSED_DIR] {
            let dir = work_dir.join(sub);
            fs::create_dir_all(&dir)
                .map_err(|e| SegmentationError::file_io_error("create frame directory", &dir, &e))?;
        }

        Ok(Self {
            work_dir,
            padding: 1,
        })
    }

    /// Fix the naming width from the whole video's frame count
    pub fn set_total_frames(&mut self, total_frames: u64) {
        self.padding = padding_width(total_frames);
    }

    #[must_use]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.work_dir.join(RAW_DIR)
    }

    #[must_use]
    pub fn processed_dir(&self) -> PathBuf {
        self.work_dir.join(PROCESSED_DIR)
    }

    /// Raw frames in temporal order
    ///
    /// # Errors
    /// - `raw/` cannot be read
    pub fn list_raw_frames(&self) -> Result<Vec<PathBuf>> {
        list_frames(&self.raw_dir())
    }

    /// Processed frames in temporal order
    ///
    /// # Errors
    /// - `processed/` cannot be read
    pub fn list_processed_frames(&self) -> Result<Vec<PathBuf>> {
        list_frames(&self.processed_dir())
    }

    /// Path a processed frame with the given index is stored at
    #[must_use]
    pub fn processed_path(&self, index: usize) -> PathBuf {
        self.processed_dir()
            .join(frame_file_name(index, self.padding))
    }

    /// Store a processed frame under the same index as its raw frame
    ///
    /// # Errors
    /// - Image encoding or write failures
    pub fn write_processed(&self, index: usize, frame: &DynamicImage) -> Result<PathBuf> {
        let path = self.processed_path(index);
        frame.save(&path)?;
        Ok(path)
    }

    /// Delete the whole working directory
    ///
    /// # Errors
    /// - File system errors while deleting
    pub fn purge(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir).map_err(|e| {
                SegmentationError::file_io_error("remove work directory", &self.work_dir, &e)
            })?;
        }
        Ok(())
    }
}

/// Frame processing statistics
#[derive(Debug, Clone, Default)]
pub struct FrameProcessingStats {
    /// Total number of frames processed
    pub frames_processed: u64,
    /// Total processing time for all frames
    pub total_processing_time: Duration,
    /// Average processing time per frame
    pub average_frame_time: Duration,
}

impl FrameProcessingStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add processing time for a frame
    pub fn add_frame_time(&mut self, processing_time: Duration) {
        self.frames_processed += 1;
        self.total_processing_time += processing_time;
        self.average_frame_time = self
            .total_processing_time
            .checked_div(u32::try_from(self.frames_processed).unwrap_or(u32::MAX))
            .unwrap_or_default();
    }

    /// Get processing speed in frames per second
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn processing_fps(&self) -> f64 {
        if self.total_processing_time.as_secs_f64() > 0.0 {
            self.frames_processed as f64 / self.total_processing_time.as_secs_f64()
        } else {
            0.0
        }
    }
}
