//! Core data types for segmentation jobs and their results

use crate::error::{Result, SegmentationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Axis-aligned box prompt in source-frame pixel coordinates.
///
/// Fixed for every frame of a job. Coordinates are not validated against the
/// frame size here; the model clamps out-of-range prompts itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Center-focused box covering roughly 70% of the frame
    /// (15% horizontal margin, 10% vertical margin on each side).
    #[must_use]
    pub fn centered(width: u32, height: u32) -> Self {
        let margin_x = (f64::from(width) * 0.15) as u32;
        let margin_y = (f64::from(height) * 0.1) as u32;
        Self::new(
            margin_x as f32,
            margin_y as f32,
            width.saturating_sub(margin_x) as f32,
            height.saturating_sub(margin_y) as f32,
        )
    }

    /// Box covering a whole frame
    #[must_use]
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl FromStr for BoundingBox {
    type Err = SegmentationError;

    /// Parses `x0,y0,x1,y1` or a JSON array `[x0, y0, x1, y1]`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        let values = trimmed
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                SegmentationError::invalid_config(format!("Invalid bbox '{}': {}", s, e))
            })?;

        match values.as_slice() {
            [xmin, ymin, xmax, ymax] => Ok(Self::new(*xmin, *ymin, *xmax, *ymax)),
            _ => Err(SegmentationError::invalid_config(format!(
                "Invalid bbox '{}': expected 4 coordinates, got {}",
                s,
                values.len()
            ))),
        }
    }
}

/// Output background: keep an alpha channel, or flatten against a color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundSpec {
    Transparent,
    Solid([u8; 3]),
}

impl BackgroundSpec {
    /// Parse `"transparent"` (case-insensitive) or a `#RRGGBB` hex color.
    ///
    /// # Errors
    /// - `InvalidBackgroundSpec` for anything else
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("transparent") {
            return Ok(Self::Transparent);
        }

        let hex = spec.strip_prefix('#').unwrap_or(spec);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SegmentationError::InvalidBackgroundSpec(spec.to_string()));
        }

        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| SegmentationError::InvalidBackgroundSpec(spec.to_string()))
        };

        Ok(Self::Solid([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent)
    }

    /// Container the final video is written in for this background
    #[must_use]
    pub fn container_format(&self) -> ContainerFormat {
        match self {
            Self::Transparent => ContainerFormat::WebM,
            Self::Solid(_) => ContainerFormat::Mp4,
        }
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::Solid([0, 255, 0])
    }
}

impl FromStr for BackgroundSpec {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for BackgroundSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transparent => f.write_str("transparent"),
            Self::Solid([r, g, b]) => write!(f, "#{r:02X}{g:02X}{b:02X}"),
        }
    }
}

/// Requested frame range; `end == 0` means "to the last frame"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

/// Frame range clamped against the real frame count of a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

impl FrameRange {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whole video
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// Reject inverted ranges. Runs before any tool is invoked.
    ///
    /// # Errors
    /// - `InvalidFrameRange` when an explicit end precedes the start
    pub fn validate(&self) -> Result<()> {
        if self.end != 0 && self.start > self.end {
            return Err(SegmentationError::InvalidFrameRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Clamp against the total frame count of the whole video.
    ///
    /// # Errors
    /// - `InvalidFrameRange` for inverted ranges or a start past the last frame
    pub fn resolve(&self, total_frames: u64) -> Result<ResolvedRange> {
        self.validate()?;
        if total_frames == 0 || self.start >= total_frames {
            return Err(SegmentationError::InvalidFrameRange {
                start: self.start,
                end: self.end,
            });
        }

        let last = total_frames - 1;
        let end = if self.end == 0 { last } else { self.end.min(last) };
        Ok(ResolvedRange {
            start: self.start,
            end,
        })
    }
}

impl ResolvedRange {
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.end + 1).saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Output container chosen from the background mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    /// H.264 (or MPEG-4 Part 2 fallback) in MP4
    Mp4,
    /// VP9 with a YUVA pixel layout in WebM
    WebM,
}

impl ContainerFormat {
    /// Get file extension for the container
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
        }
    }

    /// Get MIME type for the container
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::WebM => "video/webm",
        }
    }

    #[must_use]
    pub fn supports_alpha(&self) -> bool {
        matches!(self, Self::WebM)
    }

    /// Detect format from file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    /// Detect format from the extension of a path
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// One segmentation request. Owns `work_dir` exclusively for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationJob {
    /// Unique identifier supplied by the caller; namespaces `work_dir`
    pub job_id: String,
    pub source_video: PathBuf,
    pub bbox: BoundingBox,
    pub frame_range: FrameRange,
    pub background: BackgroundSpec,
    pub work_dir: PathBuf,
    /// Requested output path; the actual one may differ in extension
    pub output_path: PathBuf,
}

impl SegmentationJob {
    /// Create a job, checking that the source video exists.
    ///
    /// # Errors
    /// - `JobNotFound` when `source_video` does not exist
    /// - `InvalidConfig` for an empty job id
    pub fn new<S, P, W, O>(
        job_id: S,
        source_video: P,
        bbox: BoundingBox,
        background: BackgroundSpec,
        work_dir: W,
        output_path: O,
    ) -> Result<Self>
    where
        S: Into<String>,
        P: Into<PathBuf>,
        W: Into<PathBuf>,
        O: Into<PathBuf>,
    {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(SegmentationError::invalid_config("Job id cannot be empty"));
        }

        let source_video = source_video.into();
        if !source_video.is_file() {
            return Err(SegmentationError::JobNotFound(format!(
                "{} ({})",
                job_id,
                source_video.display()
            )));
        }

        Ok(Self {
            job_id,
            source_video,
            bbox,
            frame_range: FrameRange::full(),
            background,
            work_dir: work_dir.into(),
            output_path: output_path.into(),
        })
    }

    /// Create a job laid out the way the service does it:
    /// `work_root/<job_id>` for scratch space and
    /// `output_dir/<job_id>_segmented.<ext>` for the result.
    ///
    /// # Errors
    /// Same as [`SegmentationJob::new`]
    pub fn in_directories<S, P>(
        job_id: S,
        source_video: P,
        bbox: BoundingBox,
        background: BackgroundSpec,
        work_root: &Path,
        output_dir: &Path,
    ) -> Result<Self>
    where
        S: Into<String>,
        P: Into<PathBuf>,
    {
        let job_id = job_id.into();
        let work_dir = work_root.join(&job_id);
        let output_path = Self::default_output_path(&job_id, background, output_dir);
        Self::new(job_id, source_video, bbox, background, work_dir, output_path)
    }

    /// `<output_dir>/<job_id>_segmented.<ext>` with the extension chosen by background
    #[must_use]
    pub fn default_output_path(
        job_id: &str,
        background: BackgroundSpec,
        output_dir: &Path,
    ) -> PathBuf {
        output_dir.join(format!(
            "{}_segmented.{}",
            job_id,
            background.container_format().extension()
        ))
    }

    #[must_use]
    pub fn with_frame_range(mut self, frame_range: FrameRange) -> Self {
        self.frame_range = frame_range;
        self
    }
}

/// Terminal success value of a job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    /// Path actually written; may differ in extension from the requested one
    pub output_path: PathBuf,
    pub container_format: ContainerFormat,
    /// Container the job's background asked for
    pub requested_format: ContainerFormat,
    pub requested_path: PathBuf,
    pub frame_count: usize,
    pub fps: f64,
    /// Compute device the matting engine resolved to
    pub device: String,
    pub elapsed: Duration,
}

impl PipelineResult {
    /// Whether the encoder had to fall back to a different container
    ///
    /// Only a downgraded encode counts; rewriting a transparent job's
    /// extension to `.webm` does not.
    #[must_use]
    pub fn format_changed(&self) -> bool {
        self.container_format != self.requested_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_spec_parsing() {
        assert_eq!(
            BackgroundSpec::parse("transparent").unwrap(),
            BackgroundSpec::Transparent
        );
        assert_eq!(
            BackgroundSpec::parse("Transparent").unwrap(),
            BackgroundSpec::Transparent
        );
        assert_eq!(
            BackgroundSpec::parse("#00FF00").unwrap(),
            BackgroundSpec::Solid([0, 255, 0])
        );
        assert_eq!(
            BackgroundSpec::parse("#1a2B3c").unwrap(),
            BackgroundSpec::Solid([0x1a, 0x2b, 0x3c])
        );
        assert_eq!(
            BackgroundSpec::parse("ff0000").unwrap(),
            BackgroundSpec::Solid([255, 0, 0])
        );
    }

    #[test]
    fn test_background_spec_rejects_malformed_colors() {
        for bad in ["#00FF0", "#GG0000", "green", "#00FF00FF", "", "#"] {
            let err = BackgroundSpec::parse(bad).unwrap_err();
            assert!(
                matches!(err, SegmentationError::InvalidBackgroundSpec(_)),
                "expected InvalidBackgroundSpec for {bad:?}"
            );
        }
    }

    #[test]
    fn test_background_display_round_trips_through_parse() {
        let spec = BackgroundSpec::Solid([18, 52, 86]);
        assert_eq!(spec.to_string(), "#123456");
        assert_eq!(BackgroundSpec::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn test_container_follows_background() {
        assert_eq!(
            BackgroundSpec::Transparent.container_format(),
            ContainerFormat::WebM
        );
        assert_eq!(
            BackgroundSpec::Solid([0, 0, 0]).container_format(),
            ContainerFormat::Mp4
        );
        assert!(ContainerFormat::WebM.supports_alpha());
        assert!(!ContainerFormat::Mp4.supports_alpha());
    }

    #[test]
    fn test_frame_range_inverted_is_rejected() {
        let range = FrameRange::new(5, 2);
        assert!(matches!(
            range.validate(),
            Err(SegmentationError::InvalidFrameRange { start: 5, end: 2 })
        ));
        assert!(range.resolve(100).is_err());
    }

    #[test]
    fn test_frame_range_resolution() {
        let full = FrameRange::full().resolve(10).unwrap();
        assert_eq!((full.start, full.end, full.len()), (0, 9, 10));

        let clamped = FrameRange::new(3, 50).resolve(10).unwrap();
        assert_eq!((clamped.start, clamped.end, clamped.len()), (3, 9, 7));

        let inner = FrameRange::new(2, 4).resolve(10).unwrap();
        assert_eq!(inner.len(), 3);
        assert!(inner.contains(2) && inner.contains(4) && !inner.contains(5));

        let single = FrameRange::new(7, 7).resolve(10).unwrap();
        assert_eq!(single.len(), 1);

        assert!(FrameRange::new(10, 0).resolve(10).is_err());
        assert!(FrameRange::full().resolve(0).is_err());
    }

    #[test]
    fn test_bbox_parsing() {
        let bbox: BoundingBox = "10, 20, 300, 400".parse().unwrap();
        assert_eq!(bbox.as_array(), [10.0, 20.0, 300.0, 400.0]);

        let bbox: BoundingBox = "[1,2,3,4]".parse().unwrap();
        assert_eq!(bbox.as_array(), [1.0, 2.0, 3.0, 4.0]);

        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_centered_bbox() {
        let bbox = BoundingBox::centered(1000, 500);
        assert_eq!(bbox.as_array(), [150.0, 50.0, 850.0, 450.0]);
    }

    #[test]
    fn test_job_requires_existing_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.mp4");
        let err = SegmentationJob::new(
            "job-1",
            &missing,
            BoundingBox::full_frame(10, 10),
            BackgroundSpec::Transparent,
            dir.path().join("work"),
            dir.path().join("out.webm"),
        )
        .unwrap_err();
        assert!(matches!(err, SegmentationError::JobNotFound(_)));
    }

    #[test]
    fn test_job_directory_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"not really a video").unwrap();

        let job = SegmentationJob::in_directories(
            "abc",
            &source,
            BoundingBox::full_frame(10, 10),
            BackgroundSpec::Transparent,
            &dir.path().join("temp_work"),
            &dir.path().join("outputs"),
        )
        .unwrap();

        assert_eq!(job.work_dir, dir.path().join("temp_work").join("abc"));
        assert_eq!(
            job.output_path,
            dir.path().join("outputs").join("abc_segmented.webm")
        );
        assert_eq!(job.frame_range, FrameRange::full());
    }
}
