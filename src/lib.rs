#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Video Background Removal Library
//!
//! Box-prompted background removal and replacement for whole videos. Every
//! frame is segmented by a promptable segmentation model (MobileSAM, run with
//! ONNX Runtime or Tract), composited against a transparent or solid
//! background and re-encoded with `ffmpeg`.
//!
//! ## Features
//!
//! - **Fixed box prompt**: one bounding box steers the mask on every frame
//! - **Transparent or solid output**: VP9/WebM with alpha, or H.264/MP4
//! - **Robust media handling**: every `ffmpeg` call has an in-process libav
//!   fallback, and the alpha encode degrades to opaque MP4 when needed
//! - **Hardware acceleration**: CUDA and `CoreML` through ONNX Runtime, with
//!   a pure Rust CPU backend
//! - **Weights cache**: model graphs are downloaded once and optionally
//!   verified against SHA-256 digests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use video_bgremove::{
//!     BackgroundSpec, BoundingBox, FrameRange, PipelineConfig, SegmentationJob,
//!     SegmentationPipeline,
//! };
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pipeline = SegmentationPipeline::new(PipelineConfig::default())?;
//!
//! let job = SegmentationJob::in_directories(
//!     "job-42",
//!     "input.mp4",
//!     BoundingBox::new(120.0, 40.0, 520.0, 460.0),
//!     BackgroundSpec::parse("transparent")?,
//!     Path::new("/tmp/video-bgremove"),
//!     Path::new("outputs"),
//! )?
//! .with_frame_range(FrameRange::new(0, 299));
//!
//! let result = pipeline.run(&job).await?;
//! if result.format_changed() {
//!     println!("alpha encode unavailable, wrote {}", result.output_path.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `video-support` (default): in-process libav fallback for decode/encode
//! - `cli` (default): Command-line interface and progress reporting
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! video-bgremove = { version = "0.1", default-features = false, features = ["onnx", "video-support"] }
//! ```

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod matting;
pub mod processor;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::video::{
    BasicFrameIo, EncodingProfile, FfmpegCli, FrameStore, MediaTool, MediaToolAdapter, StreamInfo,
    ToolFailure, ToolOutcome,
};
#[cfg(feature = "video-support")]
pub use backends::video::LibavFrameIo;
#[cfg(feature = "onnx")]
pub use backends::OnnxSegmenter;
#[cfg(feature = "tract")]
pub use backends::TractSegmenter;
pub use cache::WeightsCache;
pub use compositor::Compositor;
pub use config::{ExecutionProvider, ModelAsset, PipelineConfig, ToolConfig, WeightsConfig};
pub use download::{ModelPaths, WeightsDownloader};
pub use error::{JobStage, Result, SegmentationError};
pub use inference::{BackendType, CandidateMask, PromptableSegmenter, ResolvedDevice};
pub use matting::{DefaultSegmenterFactory, Mask, MattingEngine, SegmenterFactory};
pub use processor::SegmentationPipeline;
pub use types::{
    BackgroundSpec, BoundingBox, ContainerFormat, FrameRange, PipelineResult, ResolvedRange,
    SegmentationJob,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};
