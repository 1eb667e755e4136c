//! ONNX Runtime backend for SAM-style promptable segmentation
//!
//! Runs the image encoder once per frame and the prompt/mask decoder with the
//! job's fixed box. The execution provider is taken from the already resolved
//! device; no availability probing happens per frame.

use crate::download::ModelPaths;
use crate::error::{Result, SegmentationError};
use crate::inference::{candidates_from_decoder, CandidateMask, PromptableSegmenter, ResolvedDevice};
use crate::types::BoundingBox;
use crate::utils::SamPreprocessor;
use image::RgbImage;
use instant::Instant;
use ndarray::ArrayD;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DynValue, TensorValueType, Value};
use std::path::Path;

/// Segmenter backed by two ONNX Runtime sessions
#[derive(Debug)]
pub struct OnnxSegmenter {
    encoder: Session,
    decoder: Session,
    device: ResolvedDevice,
}

impl OnnxSegmenter {
    #[must_use]
    pub fn cuda_available() -> bool {
        OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
    }

    #[must_use]
    pub fn coreml_available() -> bool {
        OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
    }

    /// Load both graphs on `device`
    ///
    /// # Errors
    /// - `device` is not an ONNX Runtime device
    /// - Session creation or model parsing failures
    pub fn load(paths: &ModelPaths, device: ResolvedDevice, intra_threads: usize) -> Result<Self> {
        if device == ResolvedDevice::TractCpu {
            return Err(SegmentationError::internal(
                "ONNX Runtime backend cannot run on the tract device",
            ));
        }

        let load_start = Instant::now();
        let encoder = Self::build_session(&paths.encoder, device, intra_threads)?;
        let decoder = Self::build_session(&paths.decoder, device, intra_threads)?;

        log::info!(
            "📊 ONNX Runtime models loaded on {} in {:.0}ms",
            device,
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            encoder,
            decoder,
            device,
        })
    }

    fn build_session(path: &Path, device: ResolvedDevice, intra_threads: usize) -> Result<Session> {
        let mut session_builder = Session::builder()
            .map_err(|e| SegmentationError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                SegmentationError::model(format!("Failed to set optimization level: {e}"))
            })?;

        session_builder = match device {
            ResolvedDevice::Cuda => {
                log::info!("🚀 Using CUDA execution provider");
                session_builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])
                    .map_err(|e| {
                        SegmentationError::model(format!(
                            "Failed to set CUDA execution provider: {e}"
                        ))
                    })?
            },
            ResolvedDevice::CoreMl => {
                log::info!("🍎 Using CoreML execution provider");
                session_builder
                    .with_execution_providers([CoreMLExecutionProvider::default()
                        .with_subgraphs(true)
                        .build()])
                    .map_err(|e| {
                        SegmentationError::model(format!(
                            "Failed to set CoreML execution provider: {e}"
                        ))
                    })?
            },
            ResolvedDevice::OnnxCpu | ResolvedDevice::TractCpu => {
                log::debug!("Using CPU execution provider");
                session_builder
            },
        };

        let intra_threads = if intra_threads > 0 {
            intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| SegmentationError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                SegmentationError::model(format!(
                    "Failed to create session from {}: {e}",
                    path.display()
                ))
            })?;

        log::debug!(
            "✅ Session ready for {} ({intra_threads} intra-op threads)",
            path.display()
        );
        Ok(session)
    }
}

fn extract_output(value: Option<&DynValue>, name: &str) -> Result<ArrayD<f32>> {
    let value =
        value.ok_or_else(|| SegmentationError::model(format!("Model output '{name}' missing")))?;
    let view = value
        .try_extract_array::<f32>()
        .map_err(|e| SegmentationError::model(format!("Failed to extract '{name}': {e}")))?;
    Ok(view.to_owned())
}

fn to_value<D: ndarray::Dimension + 'static>(
    array: ndarray::Array<f32, D>,
    name: &str,
) -> Result<Value<TensorValueType<f32>>> {
    Value::from_array(array)
        .map_err(|e| SegmentationError::model(format!("Failed to convert '{name}' tensor: {e}")))
}

impl PromptableSegmenter for OnnxSegmenter {
    fn device(&self) -> ResolvedDevice {
        self.device
    }

    fn segment(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Result<Vec<CandidateMask>> {
        let inference_start = Instant::now();
        let prepared = SamPreprocessor::prepare_image(frame)?;
        let prompt = SamPreprocessor::box_prompt(bbox, prepared.scale);
        let (mask_input, has_mask_input) = SamPreprocessor::empty_mask_prompt();
        let orig_im_size = SamPreprocessor::original_size(&prepared);

        let embeddings = {
            let input = to_value(prepared.tensor, "image")?;
            let outputs = self
                .encoder
                .run(ort::inputs![input])
                .map_err(|e| SegmentationError::model(format!("Image encoder failed: {e}")))?;
            let first_key = outputs
                .keys()
                .next()
                .map(|key| key.to_string())
                .ok_or_else(|| SegmentationError::model("Image encoder returned no outputs"))?;
            extract_output(outputs.get(first_key.as_str()), "image_embeddings")?
        };
        let encode_time = inference_start.elapsed();

        let (masks, scores) = {
            let outputs = self
                .decoder
                .run(ort::inputs![
                    "image_embeddings" => to_value(embeddings, "image_embeddings")?,
                    "point_coords" => to_value(prompt.point_coords, "point_coords")?,
                    "point_labels" => to_value(prompt.point_labels, "point_labels")?,
                    "mask_input" => to_value(mask_input, "mask_input")?,
                    "has_mask_input" => to_value(has_mask_input, "has_mask_input")?,
                    "orig_im_size" => to_value(orig_im_size, "orig_im_size")?,
                ])
                .map_err(|e| SegmentationError::model(format!("Mask decoder failed: {e}")))?;
            (
                extract_output(outputs.get("masks"), "masks")?,
                extract_output(outputs.get("iou_predictions"), "iou_predictions")?,
            )
        };

        log::debug!(
            "Segmented {}x{} frame in {:.2}ms (encoder {:.2}ms)",
            frame.width(),
            frame.height(),
            inference_start.elapsed().as_secs_f64() * 1000.0,
            encode_time.as_secs_f64() * 1000.0
        );

        candidates_from_decoder(masks, scores)
    }
}
