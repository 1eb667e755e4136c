//! Shared utilities

pub mod preprocessing;

pub use preprocessing::{BoxPrompt, PreparedImage, SamPreprocessor, SAM_INPUT_SIZE};
