//! Tract backend for SAM-style promptable segmentation
//!
//! Pure Rust inference on the plain CPU. The mask decoder's output size depends
//! on the `orig_im_size` input, so the decoder is specialised and optimised
//! for each distinct frame size and reused for every frame of that size.

use crate::download::ModelPaths;
use crate::error::{Result, SegmentationError};
use crate::inference::{candidates_from_decoder, CandidateMask, PromptableSegmenter, ResolvedDevice};
use crate::types::BoundingBox;
use crate::utils::preprocessing::SAM_MASK_INPUT_SIZE;
use crate::utils::{SamPreprocessor, SAM_INPUT_SIZE};
use image::RgbImage;
use instant::Instant;
use ndarray::{ArrayD, IxDyn};
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Channels and side length of the encoder's embedding
const EMBEDDING_SHAPE: [usize; 4] = [1, 256, 64, 64];

/// Segmenter backed by tract
#[derive(Debug)]
pub struct TractSegmenter {
    encoder: TractModel,
    decoder_source: InferenceModel,
    decoder: Option<((u32, u32), TractModel)>,
}

impl TractSegmenter {
    /// Load and optimise the image encoder; the decoder is parsed now and
    /// specialised on first use.
    ///
    /// # Errors
    /// - Model parsing or optimisation failures
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let load_start = Instant::now();
        log::info!("🚀 Initializing Tract backend (pure Rust, CPU)");

        let side = SAM_INPUT_SIZE as usize;
        let encoder = onnx()
            .model_for_path(&paths.encoder)
            .map_err(|e| SegmentationError::model(format!("Failed to load image encoder: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .map_err(|e| SegmentationError::model(format!("Failed to set encoder input: {e}")))?
            .into_optimized()
            .map_err(|e| SegmentationError::model(format!("Failed to optimize encoder: {e}")))?
            .into_runnable()
            .map_err(|e| {
                SegmentationError::model(format!("Failed to create runnable encoder: {e}"))
            })?;

        let decoder_source = onnx()
            .model_for_path(&paths.decoder)
            .map_err(|e| SegmentationError::model(format!("Failed to load mask decoder: {e}")))?;

        log::info!(
            "✅ Tract backend initialized in {}ms",
            load_start.elapsed().as_millis()
        );

        Ok(Self {
            encoder,
            decoder_source,
            decoder: None,
        })
    }

    fn build_decoder(&self, width: u32, height: u32) -> Result<TractModel> {
        log::debug!("Specialising mask decoder for {width}x{height} frames");

        #[allow(clippy::cast_precision_loss)]
        let orig_im_size = tensor1(&[height as f32, width as f32]);
        let mask_side = SAM_MASK_INPUT_SIZE;

        self.decoder_source
            .clone()
            .with_input_fact(0, f32::fact(EMBEDDING_SHAPE).into())
            .and_then(|m| m.with_input_fact(1, f32::fact([1, 2, 2]).into()))
            .and_then(|m| m.with_input_fact(2, f32::fact([1, 2]).into()))
            .and_then(|m| m.with_input_fact(3, f32::fact([1, 1, mask_side, mask_side]).into()))
            .and_then(|m| m.with_input_fact(4, f32::fact([1]).into()))
            .and_then(|m| m.with_input_fact(5, InferenceFact::from(orig_im_size)))
            .map_err(|e| SegmentationError::model(format!("Failed to set decoder inputs: {e}")))?
            .into_optimized()
            .map_err(|e| SegmentationError::model(format!("Failed to optimize decoder: {e}")))?
            .into_runnable()
            .map_err(|e| SegmentationError::model(format!("Failed to create runnable decoder: {e}")))
    }

    fn decoder_for(&mut self, width: u32, height: u32) -> Result<&TractModel> {
        let stale = self
            .decoder
            .as_ref()
            .map_or(true, |(size, _)| *size != (width, height));
        if stale {
            let model = self.build_decoder(width, height)?;
            self.decoder = Some(((width, height), model));
        }

        self.decoder
            .as_ref()
            .map(|(_, model)| model)
            .ok_or_else(|| SegmentationError::internal("Mask decoder missing after build"))
    }
}

fn to_tensor<D: ndarray::Dimension>(array: &ndarray::Array<f32, D>) -> Result<Tensor> {
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_shape(array.shape(), &data)
        .map_err(|e| SegmentationError::model(format!("Failed to build input tensor: {e}")))
}

fn to_ndarray(value: &TValue, name: &str) -> Result<ArrayD<f32>> {
    let view = value
        .to_array_view::<f32>()
        .map_err(|e| SegmentationError::model(format!("Failed to read '{name}': {e}")))?;
    let shape = view.shape().to_vec();
    ArrayD::from_shape_vec(IxDyn(&shape), view.iter().copied().collect())
        .map_err(|e| SegmentationError::model(format!("Malformed '{name}' tensor: {e}")))
}

impl PromptableSegmenter for TractSegmenter {
    fn device(&self) -> ResolvedDevice {
        ResolvedDevice::TractCpu
    }

    fn segment(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Result<Vec<CandidateMask>> {
        let inference_start = Instant::now();
        let prepared = SamPreprocessor::prepare_image(frame)?;

        let embeddings = self
            .encoder
            .run(tvec![to_tensor(&prepared.tensor)?.into()])
            .map_err(|e| SegmentationError::model(format!("Tract image encoder failed: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| SegmentationError::model("Image encoder returned no outputs"))?;

        let prompt = SamPreprocessor::box_prompt(bbox, prepared.scale);
        let (mask_input, has_mask_input) = SamPreprocessor::empty_mask_prompt();
        let orig_im_size = SamPreprocessor::original_size(&prepared);

        let inputs = tvec![
            embeddings,
            to_tensor(&prompt.point_coords)?.into(),
            to_tensor(&prompt.point_labels)?.into(),
            to_tensor(&mask_input)?.into(),
            to_tensor(&has_mask_input)?.into(),
            to_tensor(&orig_im_size)?.into(),
        ];

        let outputs = self
            .decoder_for(prepared.original_width, prepared.original_height)?
            .run(inputs)
            .map_err(|e| SegmentationError::model(format!("Tract mask decoder failed: {e}")))?;

        let masks = outputs
            .first()
            .ok_or_else(|| SegmentationError::model("Mask decoder returned no masks"))?;
        let scores = outputs
            .get(1)
            .ok_or_else(|| SegmentationError::model("Mask decoder returned no scores"))?;

        let candidates = candidates_from_decoder(
            to_ndarray(masks, "masks")?,
            to_ndarray(scores, "iou_predictions")?,
        )?;

        log::debug!(
            "Tract segmented {}x{} frame in {}ms",
            frame.width(),
            frame.height(),
            inference_start.elapsed().as_millis()
        );
        Ok(candidates)
    }
}
