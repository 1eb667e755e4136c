//! Error types for video segmentation operations

use std::fmt;
use thiserror::Error;

/// Result type alias for segmentation pipeline operations
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Pipeline states a job can fail in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStage {
    Init,
    /// Never the stage of an error: a failed rotation probe or re-encode
    /// continues with the original file. Kept so logs can name the state.
    RotationCheck,
    Decode,
    ModelReady,
    PerFrame,
    Encode,
    Cleanup,
}

impl JobStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RotationCheck => "rotation-check",
            Self::Decode => "decode",
            Self::ModelReady => "model-ready",
            Self::PerFrame => "per-frame",
            Self::Encode => "encode",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for the segmentation-and-recomposition pipeline
#[derive(Error, Debug)]
pub enum SegmentationError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// External media tool missing from the system
    #[error("Media tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Media tool failed and every fallback was exhausted
    #[error("{tool} failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    /// Decode produced no frames, or encode found none
    #[error("Empty frame sequence: {0}")]
    EmptyFrameSequence(String),

    /// Neither the primary tool nor the fallback decoder could read a frame
    #[error("Unreadable video: {0}")]
    UnreadableVideo(String),

    /// Model inference error on a frame; fatal to the whole job
    #[error("Segmentation failed on frame {frame}: {reason}")]
    SegmentationFailed { frame: usize, reason: String },

    /// Background was neither "transparent" nor a `#RRGGBB` color
    #[error("Invalid background spec: {0}")]
    InvalidBackgroundSpec(String),

    /// Inverted range, or a start past the end of the video
    #[error("Invalid frame range: start {start}, end {end}")]
    InvalidFrameRange { start: u64, end: u64 },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Weight download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Source video of a job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Terminal failure of a job, qualified by the state it failed in
    #[error("Segmentation job failed during {stage}: {source}")]
    Stage {
        stage: JobStage,
        #[source]
        source: Box<SegmentationError>,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SegmentationError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn empty_sequence<S: Into<String>>(msg: S) -> Self {
        Self::EmptyFrameSequence(msg.into())
    }

    pub fn unreadable<S: Into<String>>(msg: S) -> Self {
        Self::UnreadableVideo(msg.into())
    }

    pub fn tool_failed<T: Into<String>, R: Into<String>>(tool: T, reason: R) -> Self {
        Self::ToolExecutionFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn segmentation<S: Into<String>>(frame: usize, reason: S) -> Self {
        Self::SegmentationFailed {
            frame,
            reason: reason.into(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create network error with context
    pub fn network_error<S: Into<String>, E: fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Wrap an error with the job stage it occurred in.
    ///
    /// Already stage-qualified errors are returned unchanged so the innermost
    /// stage wins.
    #[must_use]
    pub fn at_stage(self, stage: JobStage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage qualification removed
    #[must_use]
    pub fn root(&self) -> &SegmentationError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage a terminal error was raised in, if it has been qualified
    #[must_use]
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
