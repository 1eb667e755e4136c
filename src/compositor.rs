//! Frame and mask compositing
//!
//! Blending is linear in the stored 8-bit values; no gamma conversion happens.

use crate::error::{Result, SegmentationError};
use crate::matting::Mask;
use crate::types::BackgroundSpec;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

/// Turns a raw frame and its mask into the processed frame for one background mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compositor {
    background: BackgroundSpec,
}

impl Compositor {
    #[must_use]
    pub fn new(background: BackgroundSpec) -> Self {
        Self { background }
    }

    #[must_use]
    pub fn background(&self) -> BackgroundSpec {
        self.background
    }

    /// RGBA for a transparent background, RGB otherwise
    ///
    /// # Errors
    /// - Mask and frame sizes differ
    pub fn composite(&self, frame: &RgbImage, mask: &Mask) -> Result<DynamicImage> {
        match self.background {
            BackgroundSpec::Transparent => Ok(DynamicImage::ImageRgba8(with_alpha(frame, mask)?)),
            BackgroundSpec::Solid(color) => Ok(DynamicImage::ImageRgb8(over_color(
                frame, mask, color,
            )?)),
        }
    }
}

fn check_dimensions(frame: &RgbImage, mask: &Mask) -> Result<()> {
    if frame.dimensions() != mask.dimensions() {
        return Err(SegmentationError::internal(format!(
            "Mask size {:?} does not match frame size {:?}",
            mask.dimensions(),
            frame.dimensions()
        )));
    }
    Ok(())
}

/// Keep the frame's channels and use the mask as alpha
///
/// # Errors
/// - Mask and frame sizes differ
pub fn with_alpha(frame: &RgbImage, mask: &Mask) -> Result<RgbaImage> {
    check_dimensions(frame, mask)?;

    let mut output = RgbaImage::new(frame.width(), frame.height());
    for (x, y, pixel) in frame.enumerate_pixels() {
        let weight = mask.weight(x, y).unwrap_or(0.0);
        let Rgb([r, g, b]) = *pixel;
        output.put_pixel(x, y, Rgba([r, g, b, (weight * 255.0).round() as u8]));
    }
    Ok(output)
}

/// `frame * w + color * (1 - w)` per channel
///
/// # Errors
/// - Mask and frame sizes differ
pub fn over_color(frame: &RgbImage, mask: &Mask, color: [u8; 3]) -> Result<RgbImage> {
    check_dimensions(frame, mask)?;

    let mut output = RgbImage::new(frame.width(), frame.height());
    for (x, y, pixel) in frame.enumerate_pixels() {
        let weight = mask.weight(x, y).unwrap_or(0.0);
        let blended: [u8; 3] = std::array::from_fn(|c| {
            let fg = f32::from(pixel.0.get(c).copied().unwrap_or(0));
            let bg = f32::from(color.get(c).copied().unwrap_or(0));
            (fg * weight + bg * (1.0 - weight)).round().clamp(0.0, 255.0) as u8
        });
        output.put_pixel(x, y, Rgb(blended));
    }
    Ok(output)
}
