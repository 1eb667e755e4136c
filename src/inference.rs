//! Inference backend abstraction and compute device resolution

use crate::config::ExecutionProvider;
use crate::error::{Result, SegmentationError};
use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::{Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inference runtime used by the matting engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime (GPU providers or vectorised CPU)
    #[default]
    Onnx,
    /// Tract (pure Rust, plain CPU)
    Tract,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Compute device chosen once when an engine is initialized
///
/// Never changes for the lifetime of the engine; output values do not depend
/// on it, only throughput does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDevice {
    Cuda,
    CoreMl,
    /// ONNX Runtime CPU provider (SIMD kernels)
    OnnxCpu,
    /// Tract CPU
    TractCpu,
}

impl ResolvedDevice {
    #[must_use]
    pub fn backend(&self) -> BackendType {
        match self {
            Self::Cuda | Self::CoreMl | Self::OnnxCpu => BackendType::Onnx,
            Self::TractCpu => BackendType::Tract,
        }
    }

    #[must_use]
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Cuda | Self::CoreMl)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "onnx:cuda",
            Self::CoreMl => "onnx:coreml",
            Self::OnnxCpu => "onnx:cpu",
            Self::TractCpu => "tract:cpu",
        }
    }
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtimes compiled into this build and accelerators visible to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceAvailability {
    pub onnx: bool,
    pub tract: bool,
    pub cuda: bool,
    pub coreml: bool,
}

impl DeviceAvailability {
    /// Probe the current process
    #[must_use]
    pub fn detect() -> Self {
        #[cfg(feature = "onnx")]
        let (cuda, coreml) = (
            crate::backends::OnnxSegmenter::cuda_available(),
            crate::backends::OnnxSegmenter::coreml_available(),
        );
        #[cfg(not(feature = "onnx"))]
        let (cuda, coreml) = (false, false);

        Self {
            onnx: cfg!(feature = "onnx"),
            tract: cfg!(feature = "tract"),
            cuda,
            coreml,
        }
    }
}

/// Pick the fastest usable device for the requested backend and provider.
///
/// `Auto` prefers CUDA, then `CoreML`, then the ONNX Runtime CPU provider.
/// Explicitly requested accelerators that are missing degrade to CPU with a
/// warning. Tract is used when requested or when ONNX Runtime is not built in.
///
/// # Errors
/// - Neither inference runtime is compiled in
pub fn resolve_device(
    backend: BackendType,
    provider: ExecutionProvider,
    available: &DeviceAvailability,
) -> Result<ResolvedDevice> {
    let use_tract = match backend {
        BackendType::Tract if available.tract => true,
        BackendType::Tract if available.onnx => {
            log::warn!("Tract backend requested but not compiled in, using ONNX Runtime");
            false
        },
        BackendType::Onnx if available.onnx => false,
        BackendType::Onnx if available.tract => {
            log::warn!("ONNX Runtime not compiled in, using Tract");
            true
        },
        _ => {
            return Err(SegmentationError::model(
                "No inference backend available: enable the `onnx` or `tract` feature",
            ))
        },
    };

    if use_tract {
        if !matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cpu) {
            log::warn!("Tract only runs on CPU, ignoring execution provider {provider}");
        }
        return Ok(ResolvedDevice::TractCpu);
    }

    let device = match provider {
        ExecutionProvider::Auto if available.cuda => ResolvedDevice::Cuda,
        ExecutionProvider::Auto if available.coreml => ResolvedDevice::CoreMl,
        ExecutionProvider::Auto | ExecutionProvider::Cpu => ResolvedDevice::OnnxCpu,
        ExecutionProvider::Cuda if available.cuda => ResolvedDevice::Cuda,
        ExecutionProvider::CoreMl if available.coreml => ResolvedDevice::CoreMl,
        ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
            log::warn!("{provider} execution provider requested but not available, falling back to CPU");
            ResolvedDevice::OnnxCpu
        },
    };
    Ok(device)
}

/// One candidate mask proposed by the model
#[derive(Debug, Clone)]
pub struct CandidateMask {
    /// Mask logits at the frame's resolution, shape `(height, width)`
    pub logits: Array2<f32>,
    /// Predicted quality of the mask
    pub score: f32,
}

/// A segmentation model that proposes masks for a box prompt
///
/// Implementations are not re-entrant: `segment` takes `&mut self` and an
/// instance must never be shared between concurrent jobs.
pub trait PromptableSegmenter: Send {
    /// Device the model was loaded on
    fn device(&self) -> ResolvedDevice;

    /// Propose candidate masks for `frame` prompted with `bbox`.
    ///
    /// # Errors
    /// - Tensor conversion or model execution failures
    fn segment(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Result<Vec<CandidateMask>>;
}

/// Split raw mask-decoder outputs into candidates.
///
/// `masks` has shape `[1, K, H, W]`, `scores` `[1, K]`. A four-candidate
/// decoder also emits its single-mask token first; that candidate is dropped.
///
/// # Errors
/// - Unexpected tensor ranks or mismatched candidate counts
pub(crate) fn candidates_from_decoder(
    masks: ArrayD<f32>,
    scores: ArrayD<f32>,
) -> Result<Vec<CandidateMask>> {
    if masks.ndim() != 4 {
        return Err(SegmentationError::model(format!(
            "Expected 4D mask tensor, got {}D",
            masks.ndim()
        )));
    }

    let scores: Vec<f32> = scores.iter().copied().collect();
    let count = masks.shape().get(1).copied().unwrap_or(0);
    if count != scores.len() {
        return Err(SegmentationError::model(format!(
            "Decoder returned {} masks but {} scores",
            count,
            scores.len()
        )));
    }

    let skip = usize::from(count == 4);
    let batch = masks.index_axis(Axis(0), 0);

    (skip..count)
        .map(|i| {
            let logits = batch
                .index_axis(Axis(0), i)
                .to_owned()
                .into_dimensionality::<Ix2>()
                .map_err(|e| SegmentationError::model(format!("Malformed mask tensor: {e}")))?;
            Ok(CandidateMask {
                logits,
                score: scores.get(i).copied().unwrap_or(f32::NAN),
            })
        })
        .collect()
}
