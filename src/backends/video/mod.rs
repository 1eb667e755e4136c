//! Media tool backend
//!
//! All decode/encode work is delegated to an external media tool (`ffmpeg` and
//! `ffprobe`). Every primary call reports a tagged [`ToolOutcome`] instead of an
//! error, and small pure functions decide whether the in-process fallback
//! ([`BasicFrameIo`]) has to take over. The [`MediaToolAdapter`] wires the two
//! together so that only exhaustion of both paths surfaces as an error.

pub mod adapter;
pub mod cli;
pub mod codec;
#[cfg(feature = "video-support")]
pub mod ffmpeg;
pub mod frame;

pub use adapter::MediaToolAdapter;
pub use cli::FfmpegCli;
pub use codec::*;
#[cfg(feature = "video-support")]
pub use ffmpeg::LibavFrameIo;
pub use frame::*;

use crate::error::Result;
use crate::types::ResolvedRange;
use async_trait::async_trait;
use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Video stream properties needed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    /// Frames per second
    pub fps: f64,
    /// Frame count of the whole video
    pub total_frames: u64,
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
}

/// Why a primary tool invocation did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    /// Binary missing or not executable
    Unavailable(String),
    /// Non-zero exit
    Exited { code: Option<i32>, stderr: String },
    /// Invocation exceeded its time limit and was killed
    TimedOut(Duration),
    /// Tool ran but its result is unusable
    Invalid(String),
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "tool unavailable: {reason}"),
            Self::Exited { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                write!(f, "exited with {code}: {}", stderr.trim())
            },
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            Self::Invalid(reason) => write!(f, "unusable result: {reason}"),
        }
    }
}

/// Result of a primary tool invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome<T> {
    Completed(T),
    ToolFailed(ToolFailure),
}

impl<T> ToolOutcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ToolOutcome<U> {
        match self {
            Self::Completed(value) => ToolOutcome::Completed(f(value)),
            Self::ToolFailed(failure) => ToolOutcome::ToolFailed(failure),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Branch chosen after a primary invocation
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackDecision<T> {
    /// Keep the primary result
    Use(T),
    /// Run the fallback path
    Fallback(ToolFailure),
}

/// Next step of the encode chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeStep {
    Finished,
    /// Alpha encode failed: retry as an opaque MP4
    DowngradeToOpaque(ToolFailure),
    /// Opaque encode failed: use the in-process writer
    BasicWriter(ToolFailure),
}

/// Any completed result is used as is.
#[must_use]
pub fn decide<T>(outcome: ToolOutcome<T>) -> FallbackDecision<T> {
    match outcome {
        ToolOutcome::Completed(value) => FallbackDecision::Use(value),
        ToolOutcome::ToolFailed(failure) => FallbackDecision::Fallback(failure),
    }
}

/// A probe without a frame rate or frame count is as good as no probe.
#[must_use]
pub fn decide_probe(outcome: ToolOutcome<StreamInfo>) -> FallbackDecision<StreamInfo> {
    match decide(outcome) {
        FallbackDecision::Use(info) if info.total_frames == 0 || !(info.fps > 0.0) => {
            FallbackDecision::Fallback(ToolFailure::Invalid(format!(
                "probe reported {} frames at {} fps",
                info.total_frames, info.fps
            )))
        },
        decision => decision,
    }
}

/// Extracting zero frames counts as a failure.
#[must_use]
pub fn decide_extraction(outcome: ToolOutcome<usize>) -> FallbackDecision<usize> {
    match decide(outcome) {
        FallbackDecision::Use(0) => {
            FallbackDecision::Fallback(ToolFailure::Invalid("no frames extracted".to_string()))
        },
        decision => decision,
    }
}

/// Alpha failures degrade to opaque; opaque failures go to the basic writer.
#[must_use]
pub fn decide_encode(alpha: bool, outcome: ToolOutcome<()>) -> EncodeStep {
    match outcome {
        ToolOutcome::Completed(()) => EncodeStep::Finished,
        ToolOutcome::ToolFailed(failure) if alpha => EncodeStep::DowngradeToOpaque(failure),
        ToolOutcome::ToolFailed(failure) => EncodeStep::BasicWriter(failure),
    }
}

/// Rotation to bake in, if any. A failed probe means "keep the original".
#[must_use]
pub fn decide_rotation(outcome: ToolOutcome<i32>) -> Option<i32> {
    match outcome {
        ToolOutcome::Completed(degrees) if degrees % 360 != 0 => Some(degrees),
        ToolOutcome::Completed(_) => None,
        ToolOutcome::ToolFailed(failure) => {
            log::debug!("Rotation probe failed, keeping original: {failure}");
            None
        },
    }
}

/// The external media tool (primary path)
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Rotation metadata of the first video stream in degrees
    async fn probe_rotation(&self, video: &Path) -> ToolOutcome<i32>;

    /// Re-encode `video` into `output` with its rotation applied to the pixels
    async fn bake_rotation(&self, video: &Path, output: &Path) -> ToolOutcome<()>;

    async fn probe_stream(&self, video: &Path) -> ToolOutcome<StreamInfo>;

    /// Write frames `range` of `video` into `out_dir`, numbered from 0.
    /// Returns the number of frames written.
    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        range: ResolvedRange,
        padding: usize,
    ) -> ToolOutcome<usize>;

    /// Encode the numbered frames of `frames_dir` into `output`
    async fn encode_frames(
        &self,
        frames_dir: &Path,
        padding: usize,
        fps: f64,
        output: &Path,
        profile: &EncodingProfile,
    ) -> ToolOutcome<()>;

    /// Save the first frame of `video` as an image at `output`
    async fn extract_first_frame(&self, video: &Path, output: &Path) -> ToolOutcome<()>;
}

/// Basic in-process decode/encode capability (fallback path)
///
/// Methods block; callers run them on a blocking thread.
pub trait BasicFrameIo: Send + Sync {
    /// Read stream properties from container metadata
    ///
    /// # Errors
    /// - Unreadable file or no video stream
    fn probe(&self, video: &Path) -> Result<StreamInfo>;

    /// Decode sequentially, writing frames inside `range` renumbered from 0.
    /// Returns the number of frames written.
    ///
    /// # Errors
    /// - Unreadable file or decode failures
    fn decode_range(
        &self,
        video: &Path,
        out_dir: &Path,
        range: ResolvedRange,
        padding: usize,
    ) -> Result<usize>;

    /// Decode the first frame
    ///
    /// # Errors
    /// - No frame could be read
    fn read_first_frame(&self, video: &Path) -> Result<RgbImage>;

    /// Write `frames` into `output` with a codec every build supports.
    /// The canvas size is taken from the first frame.
    ///
    /// # Errors
    /// - Empty `frames` or encode failures
    fn encode(&self, frames: &[PathBuf], fps: f64, output: &Path) -> Result<()>;
}
