//! Fake media tool and segmenter shared by the integration tests
//!
//! The fake tool "decodes" a synthetic video whose pixels are a pure function
//! of frame index and position, and "encodes" by loading the processed frames
//! into memory so tests can inspect exactly what would have been written.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use video_bgremove::{
    backends::video::{frame_file_name, list_frames},
    BackgroundSpec, BasicFrameIo, BoundingBox, CandidateMask, EncodingProfile, MediaTool,
    MediaToolAdapter, PipelineConfig, PromptableSegmenter, ResolvedDevice, ResolvedRange, Result,
    SegmentationError, SegmentationJob, SegmentationPipeline, SegmenterFactory, StreamInfo,
    ToolFailure, ToolOutcome,
};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;
pub const FPS: f64 = 25.0;

/// Marker content for source files no tool can read
pub const CORRUPT: &[u8] = b"corrupt";

/// Pixel of the synthetic video at absolute frame `index`
#[must_use]
pub fn source_pixel(index: u64, x: u32, y: u32) -> Rgb<u8> {
    Rgb([
        (index * 20 + u64::from(x) * 7) as u8,
        (y * 13 + 40) as u8,
        (100 + index * 3) as u8,
    ])
}

/// Absolute frame `index` of the synthetic video
#[must_use]
pub fn source_frame(index: u64) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| source_pixel(index, x, y))
}

/// One encode call as seen by the fake tool
#[derive(Debug, Clone)]
pub struct EncodeRecord {
    pub output: PathBuf,
    pub alpha: bool,
    pub padding: usize,
    pub frame_names: Vec<String>,
    pub frames: Vec<DynamicImage>,
}

/// Scriptable stand-in for ffmpeg/ffprobe
#[derive(Debug)]
pub struct FakeMediaTool {
    pub total_frames: u64,
    pub rotation: i32,
    pub fail_alpha: bool,
    pub fail_bake: bool,
    calls: AtomicUsize,
    bakes: AtomicUsize,
    encodes: Mutex<Vec<EncodeRecord>>,
}

impl FakeMediaTool {
    #[must_use]
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            rotation: 0,
            fail_alpha: false,
            fail_bake: false,
            calls: AtomicUsize::new(0),
            bakes: AtomicUsize::new(0),
            encodes: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn rotated(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    #[must_use]
    pub fn without_alpha_encoder(mut self) -> Self {
        self.fail_alpha = true;
        self
    }

    /// Rotation re-encode exits non-zero after leaving a partial copy
    #[must_use]
    pub fn without_rotation_fix(mut self) -> Self {
        self.fail_bake = true;
        self
    }

    /// Tool invocations of any kind
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bakes(&self) -> usize {
        self.bakes.load(Ordering::SeqCst)
    }

    pub fn encodes(&self) -> Vec<EncodeRecord> {
        self.encodes.lock().unwrap().clone()
    }

    /// Frames handed to the last successful encode
    pub fn last_encoded_frames(&self) -> Vec<DynamicImage> {
        self.encodes()
            .into_iter()
            .rev()
            .find(|record| record.output.exists())
            .map(|record| record.frames)
            .unwrap_or_default()
    }

    fn record_call(&self, video: &Path) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::read(video).map(|bytes| !bytes.starts_with(CORRUPT)).unwrap_or(false)
    }

    fn unreadable() -> ToolFailure {
        ToolFailure::Exited {
            code: Some(1),
            stderr: "Invalid data found when processing input".to_string(),
        }
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe_rotation(&self, video: &Path) -> ToolOutcome<i32> {
        if !self.record_call(video) {
            return ToolOutcome::ToolFailed(Self::unreadable());
        }
        ToolOutcome::Completed(self.rotation)
    }

    async fn bake_rotation(&self, video: &Path, output: &Path) -> ToolOutcome<()> {
        if !self.record_call(video) {
            return ToolOutcome::ToolFailed(Self::unreadable());
        }
        if self.fail_bake {
            fs::write(output, b"partial").ok();
            return ToolOutcome::ToolFailed(ToolFailure::Exited {
                code: Some(1),
                stderr: "Error while filtering".to_string(),
            });
        }
        self.bakes.fetch_add(1, Ordering::SeqCst);
        match fs::copy(video, output) {
            Ok(_) => ToolOutcome::Completed(()),
            Err(e) => ToolOutcome::ToolFailed(ToolFailure::Invalid(e.to_string())),
        }
    }

    async fn probe_stream(&self, video: &Path) -> ToolOutcome<StreamInfo> {
        if !self.record_call(video) {
            return ToolOutcome::ToolFailed(Self::unreadable());
        }
        ToolOutcome::Completed(StreamInfo {
            fps: FPS,
            total_frames: self.total_frames,
            width: WIDTH,
            height: HEIGHT,
        })
    }

    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        range: ResolvedRange,
        padding: usize,
    ) -> ToolOutcome<usize> {
        if !self.record_call(video) {
            return ToolOutcome::ToolFailed(Self::unreadable());
        }
        let mut written = 0;
        for index in range.start..=range.end.min(self.total_frames.saturating_sub(1)) {
            let path = out_dir.join(frame_file_name((index - range.start) as usize, padding));
            if let Err(e) = source_frame(index).save(&path) {
                return ToolOutcome::ToolFailed(ToolFailure::Invalid(e.to_string()));
            }
            written += 1;
        }
        ToolOutcome::Completed(written)
    }

    async fn encode_frames(
        &self,
        frames_dir: &Path,
        padding: usize,
        _fps: f64,
        output: &Path,
        profile: &EncodingProfile,
    ) -> ToolOutcome<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let paths = list_frames(frames_dir).unwrap_or_default();
        let record = EncodeRecord {
            output: output.to_path_buf(),
            alpha: profile.supports_alpha(),
            padding,
            frame_names: paths
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect(),
            frames: paths.iter().filter_map(|p| image::open(p).ok()).collect(),
        };
        self.encodes.lock().unwrap().push(record);

        // A failing encoder still leaves a truncated file behind
        fs::write(output, b"partial").ok();
        if self.fail_alpha && profile.supports_alpha() {
            return ToolOutcome::ToolFailed(ToolFailure::Exited {
                code: Some(1),
                stderr: "Unknown encoder 'libvpx-vp9'".to_string(),
            });
        }
        match fs::write(output, b"encoded") {
            Ok(()) => ToolOutcome::Completed(()),
            Err(e) => ToolOutcome::ToolFailed(ToolFailure::Invalid(e.to_string())),
        }
    }

    async fn extract_first_frame(&self, video: &Path, output: &Path) -> ToolOutcome<()> {
        if !self.record_call(video) {
            return ToolOutcome::ToolFailed(Self::unreadable());
        }
        match source_frame(0).save(output) {
            Ok(()) => ToolOutcome::Completed(()),
            Err(e) => ToolOutcome::ToolFailed(ToolFailure::Invalid(e.to_string())),
        }
    }
}

/// Fallback that cannot read anything
#[derive(Debug, Default)]
pub struct BrokenFrameIo;

impl BasicFrameIo for BrokenFrameIo {
    fn probe(&self, video: &Path) -> Result<StreamInfo> {
        Err(SegmentationError::unreadable(video.display().to_string()))
    }

    fn decode_range(
        &self,
        video: &Path,
        _out_dir: &Path,
        _range: ResolvedRange,
        _padding: usize,
    ) -> Result<usize> {
        Err(SegmentationError::unreadable(video.display().to_string()))
    }

    fn read_first_frame(&self, video: &Path) -> Result<RgbImage> {
        Err(SegmentationError::unreadable(video.display().to_string()))
    }

    fn encode(&self, _frames: &[PathBuf], _fps: f64, output: &Path) -> Result<()> {
        Err(SegmentationError::tool_failed("libav", output.display().to_string()))
    }
}

/// Proposes the box itself as the best mask and its complement as a weaker one
#[derive(Debug)]
pub struct BoxSegmenter {
    fail_on_call: Option<usize>,
    calls: usize,
    prompts: Arc<Mutex<Vec<BoundingBox>>>,
}

impl PromptableSegmenter for BoxSegmenter {
    fn device(&self) -> ResolvedDevice {
        ResolvedDevice::TractCpu
    }

    fn segment(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Result<Vec<CandidateMask>> {
        let call = self.calls;
        self.calls += 1;
        self.prompts.lock().unwrap().push(*bbox);
        if self.fail_on_call == Some(call) {
            return Err(SegmentationError::model("decoder produced NaN logits"));
        }

        let (width, height) = frame.dimensions();
        let inside = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            if cx >= bbox.xmin && cx < bbox.xmax && cy >= bbox.ymin && cy < bbox.ymax {
                4.0
            } else {
                -4.0
            }
        });
        let outside = inside.mapv(|l| -l);
        Ok(vec![
            CandidateMask {
                logits: outside,
                score: 0.2,
            },
            CandidateMask {
                logits: inside,
                score: 0.9,
            },
        ])
    }
}

/// Hands out [`BoxSegmenter`]s and remembers every prompt they saw
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub fail_on_frame: Option<usize>,
    pub fail_to_load: bool,
    created: AtomicUsize,
    prompts: Arc<Mutex<Vec<BoundingBox>>>,
}

impl FakeFactory {
    #[must_use]
    pub fn failing_on_frame(frame: usize) -> Self {
        Self {
            fail_on_frame: Some(frame),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_to_load() -> Self {
        Self {
            fail_to_load: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<BoundingBox> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmenterFactory for FakeFactory {
    async fn create(&self, _config: &PipelineConfig) -> Result<Box<dyn PromptableSegmenter>> {
        if self.fail_to_load {
            return Err(SegmentationError::model("weights are truncated"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BoxSegmenter {
            fail_on_call: self.fail_on_frame,
            calls: 0,
            prompts: Arc::clone(&self.prompts),
        }))
    }
}

/// Scratch layout of one test: source video plus work and output roots
pub struct Workspace {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub work_root: PathBuf,
    pub output_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_source(b"fake video stream")
    }

    pub fn with_source(content: &[u8]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("clip.mp4");
        fs::write(&source, content).unwrap();
        let work_root = temp_dir.path().join("work");
        let output_dir = temp_dir.path().join("outputs");
        Self {
            temp_dir,
            source,
            work_root,
            output_dir,
        }
    }

    pub fn job(&self, job_id: &str, bbox: BoundingBox, background: &str) -> SegmentationJob {
        SegmentationJob::in_directories(
            job_id,
            &self.source,
            bbox,
            BackgroundSpec::parse(background).unwrap(),
            &self.work_root,
            &self.output_dir,
        )
        .unwrap()
    }
}

pub fn pipeline(
    tool: &Arc<FakeMediaTool>,
    factory: &Arc<FakeFactory>,
    retain_workdir_on_failure: bool,
) -> SegmentationPipeline {
    let config = PipelineConfig::builder()
        .progress_interval(3)
        .retain_workdir_on_failure(retain_workdir_on_failure)
        .build()
        .unwrap();
    let tool: Arc<dyn MediaTool> = tool.clone();
    let fallback: Arc<dyn BasicFrameIo> = Arc::new(BrokenFrameIo);
    let factory: Arc<dyn SegmenterFactory> = factory.clone();
    SegmentationPipeline::with_components(config, MediaToolAdapter::new(tool, Some(fallback)), factory)
        .unwrap()
}
