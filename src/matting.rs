//! Matting engine: one mask per frame from a fixed box prompt

use crate::cache::WeightsCache;
use crate::config::PipelineConfig;
use crate::download::{ModelPaths, WeightsDownloader};
use crate::error::{Result, SegmentationError};
use crate::inference::{
    resolve_device, CandidateMask, DeviceAvailability, PromptableSegmenter, ResolvedDevice,
};
use crate::types::BoundingBox;
use async_trait::async_trait;
use image::RgbImage;
use instant::Instant;
use ndarray::Array2;

/// Per-pixel foreground weights in `[0, 1]`, shape `(height, width)`
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    weights: Array2<f32>,
}

impl Mask {
    /// Wrap weights, clamping every value into `[0, 1]`. NaN becomes 0.
    #[must_use]
    pub fn from_weights(mut weights: Array2<f32>) -> Self {
        weights.mapv_inplace(|w| if w.is_nan() { 0.0 } else { w.clamp(0.0, 1.0) });
        Self { weights }
    }

    /// Binarise model logits at 0
    #[must_use]
    pub fn from_logits(logits: &Array2<f32>) -> Self {
        Self {
            weights: logits.mapv(|l| if l > 0.0 { 1.0 } else { 0.0 }),
        }
    }

    /// Uniform mask
    #[must_use]
    pub fn filled(width: u32, height: u32, weight: f32) -> Self {
        Self::from_weights(Array2::from_elem((height as usize, width as usize), weight))
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        let (h, w) = self.weights.dim();
        (w as u32, h as u32)
    }

    #[must_use]
    pub fn weight(&self, x: u32, y: u32) -> Option<f32> {
        self.weights.get((y as usize, x as usize)).copied()
    }

    #[must_use]
    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Fraction of the frame covered by foreground weight
    #[must_use]
    pub fn coverage(&self) -> f32 {
        if self.weights.is_empty() {
            return 0.0;
        }
        self.weights.sum() / self.weights.len() as f32
    }
}

/// Index of the highest-scoring candidate.
///
/// Ties go to the earliest candidate and NaN scores never win. `None` when no
/// candidate has a usable score.
#[must_use]
pub fn select_best(candidates: &[CandidateMask]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, c)| match best {
            Some((_, score)) if score >= c.score => best,
            _ => Some((i, c.score)),
        })
        .map(|(i, _)| i)
}

/// Creates the segmentation model for a job
#[async_trait]
pub trait SegmenterFactory: Send + Sync {
    /// Load a fresh model instance
    ///
    /// # Errors
    /// - Weight download or model loading failures
    async fn create(&self, config: &PipelineConfig) -> Result<Box<dyn PromptableSegmenter>>;
}

/// Downloads weights on first use and loads them on the fastest device
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSegmenterFactory {
    show_progress: bool,
}

impl DefaultSegmenterFactory {
    #[must_use]
    pub fn with_progress(show_progress: bool) -> Self {
        Self { show_progress }
    }
}

#[async_trait]
impl SegmenterFactory for DefaultSegmenterFactory {
    async fn create(&self, config: &PipelineConfig) -> Result<Box<dyn PromptableSegmenter>> {
        let cache = WeightsCache::new(config.weights.cache_dir.clone())?;
        let paths = WeightsDownloader::new(cache)?
            .with_progress(self.show_progress)
            .ensure_model(&config.weights)
            .await?;

        let device = resolve_device(
            config.backend,
            config.execution_provider,
            &DeviceAvailability::detect(),
        )?;
        let intra_threads = config.intra_threads;

        tokio::task::spawn_blocking(move || load_segmenter(&paths, device, intra_threads))
            .await
            .map_err(|e| SegmentationError::internal(format!("Model loading task failed: {e}")))?
    }
}

#[allow(unused_variables)]
fn load_segmenter(
    paths: &ModelPaths,
    device: ResolvedDevice,
    intra_threads: usize,
) -> Result<Box<dyn PromptableSegmenter>> {
    match device {
        #[cfg(feature = "tract")]
        ResolvedDevice::TractCpu => Ok(Box::new(crate::backends::TractSegmenter::load(paths)?)),
        #[cfg(feature = "onnx")]
        ResolvedDevice::Cuda | ResolvedDevice::CoreMl | ResolvedDevice::OnnxCpu => Ok(Box::new(
            crate::backends::OnnxSegmenter::load(paths, device, intra_threads)?,
        )),
        #[allow(unreachable_patterns)]
        other => Err(SegmentationError::model(format!(
            "Device {other} resolved but its backend is not compiled in"
        ))),
    }
}

/// Model handle for a single job
///
/// Not re-entrant: `predict` takes `&mut self`. Concurrent jobs each need
/// their own engine.
pub struct MattingEngine {
    segmenter: Box<dyn PromptableSegmenter>,
}

impl std::fmt::Debug for MattingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattingEngine")
            .field("device", &self.segmenter.device())
            .finish()
    }
}

impl MattingEngine {
    /// Fetch weights if needed, pick the device once and load the model
    ///
    /// # Errors
    /// - Download, device resolution or model loading failures
    pub async fn initialize(config: &PipelineConfig) -> Result<Self> {
        Self::with_factory(&DefaultSegmenterFactory::default(), config).await
    }

    /// Load the model through a custom factory
    ///
    /// # Errors
    /// - Whatever the factory reports
    pub async fn with_factory(
        factory: &dyn SegmenterFactory,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let load_start = Instant::now();
        let segmenter = factory.create(config).await?;
        log::info!(
            "Matting engine ready on {} in {:.2}s",
            segmenter.device(),
            load_start.elapsed().as_secs_f64()
        );
        Ok(Self::from_segmenter(segmenter))
    }

    #[must_use]
    pub fn from_segmenter(segmenter: Box<dyn PromptableSegmenter>) -> Self {
        Self { segmenter }
    }

    #[must_use]
    pub fn device(&self) -> ResolvedDevice {
        self.segmenter.device()
    }

    /// Predict the mask of frame `index` for `bbox`.
    ///
    /// # Errors
    /// - `SegmentationFailed` on any model error, a missing candidate or a
    ///   mask whose size differs from the frame
    pub fn predict(&mut self, index: usize, frame: &RgbImage, bbox: &BoundingBox) -> Result<Mask> {
        let candidates = self
            .segmenter
            .segment(frame, bbox)
            .map_err(|e| SegmentationError::segmentation(index, e.to_string()))?;

        let best = select_best(&candidates)
            .and_then(|i| candidates.get(i))
            .ok_or_else(|| SegmentationError::segmentation(index, "model returned no scored mask"))?;

        let mask = Mask::from_logits(&best.logits);
        if mask.dimensions() != frame.dimensions() {
            return Err(SegmentationError::segmentation(
                index,
                format!(
                    "mask is {:?} but frame is {:?}",
                    mask.dimensions(),
                    frame.dimensions()
                ),
            ));
        }

        log::trace!(
            "Frame {index}: picked candidate with score {:.3}, coverage {:.1}%",
            best.score,
            mask.coverage() * 100.0
        );
        Ok(mask)
    }
}
