//! Image and prompt preprocessing for SAM-style promptable segmenters
//!
//! Frames are resized so the longest side matches the encoder input, normalised
//! with the SAM pixel statistics and zero-padded on the bottom/right. Box
//! prompts are mapped into the same resized coordinate space.

use crate::{
    error::{Result, SegmentationError},
    types::BoundingBox,
};
use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Array4};

/// Side length of the square encoder input
pub const SAM_INPUT_SIZE: u32 = 1024;

/// Side length of the low-resolution mask prompt
pub const SAM_MASK_INPUT_SIZE: usize = 256;

const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Point labels marking the top-left and bottom-right corners of a box prompt
const BOX_CORNER_LABELS: [f32; 2] = [2.0, 3.0];

/// A frame prepared for the image encoder
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// NCHW tensor of shape `(1, 3, SAM_INPUT_SIZE, SAM_INPUT_SIZE)`
    pub tensor: Array4<f32>,
    /// Factor applied to the original frame coordinates
    pub scale: f32,
    pub original_width: u32,
    pub original_height: u32,
}

/// Decoder prompt tensors for a single box
#[derive(Debug, Clone)]
pub struct BoxPrompt {
    /// `(1, 2, 2)` corner coordinates in encoder space
    pub point_coords: Array3<f32>,
    /// `(1, 2)` corner labels
    pub point_labels: Array2<f32>,
}

/// SAM preprocessing helpers
pub struct SamPreprocessor;

impl SamPreprocessor {
    /// Resize, normalise and pad a frame for the image encoder
    ///
    /// # Errors
    /// - Zero-sized frames
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn prepare_image(frame: &RgbImage) -> Result<PreparedImage> {
        let (orig_width, orig_height) = frame.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(SegmentationError::invalid_config(format!(
                "Cannot segment an empty {orig_width}x{orig_height} frame"
            )));
        }

        let scale = Self::scale_for(orig_width, orig_height);
        let new_width = ((orig_width as f32 * scale + 0.5) as u32).clamp(1, SAM_INPUT_SIZE);
        let new_height = ((orig_height as f32 * scale + 0.5) as u32).clamp(1, SAM_INPUT_SIZE);

        let resized = image::imageops::resize(
            frame,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        let side = SAM_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        #[allow(clippy::indexing_slicing)]
        // Safe: resized dimensions are clamped to the tensor size
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (f32::from(pixel[c]) - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }

        Ok(PreparedImage {
            tensor,
            scale,
            original_width: orig_width,
            original_height: orig_height,
        })
    }

    /// Encoder-space scale factor for a frame of the given size
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scale_for(width: u32, height: u32) -> f32 {
        SAM_INPUT_SIZE as f32 / width.max(height).max(1) as f32
    }

    /// Map a box in frame pixels to decoder point prompts
    #[must_use]
    pub fn box_prompt(bbox: &BoundingBox, scale: f32) -> BoxPrompt {
        let coords = [
            bbox.xmin * scale,
            bbox.ymin * scale,
            bbox.xmax * scale,
            bbox.ymax * scale,
        ];

        BoxPrompt {
            point_coords: Array3::from_shape_fn((1, 2, 2), |(_, point, axis)| {
                coords.get(point * 2 + axis).copied().unwrap_or(0.0)
            }),
            point_labels: Array2::from_shape_fn((1, 2), |(_, point)| {
                BOX_CORNER_LABELS.get(point).copied().unwrap_or(0.0)
            }),
        }
    }

    /// Empty low-resolution mask prompt and its "unused" flag
    #[must_use]
    pub fn empty_mask_prompt() -> (Array4<f32>, Array1<f32>) {
        (
            Array4::zeros((1, 1, SAM_MASK_INPUT_SIZE, SAM_MASK_INPUT_SIZE)),
            Array1::zeros(1),
        )
    }

    /// Original frame size as the decoder expects it: `[height, width]`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn original_size(prepared: &PreparedImage) -> Array1<f32> {
        Array1::from(vec![
            prepared.original_height as f32,
            prepared.original_width as f32,
        ])
    }
}
