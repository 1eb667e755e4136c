//! Backend implementations
//!
//! - ONNX Runtime segmenter (GPU acceleration, SIMD CPU)
//! - Tract segmenter (pure Rust, plain CPU)
//! - Media backend (external `ffmpeg` with an in-process libav fallback)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod video;

// Re-export backends based on enabled features
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSegmenter;

#[cfg(feature = "tract")]
pub use self::tract::TractSegmenter;

pub use self::video::{FrameStore, MediaToolAdapter};
