//! Segmentation job orchestration
//!
//! [`SegmentationPipeline`] drives one job through
//! `Init → RotationCheck → Decode → ModelReady → PerFrame → Encode → Cleanup`.
//! A failure in any state ends the job with a single stage-qualified error;
//! no partial output is ever reported as success.

use crate::{
    backends::video::{FrameProcessingStats, FrameStore, MediaToolAdapter},
    compositor::Compositor,
    config::PipelineConfig,
    error::{JobStage, Result, SegmentationError},
    matting::{DefaultSegmenterFactory, MattingEngine, SegmenterFactory},
    types::{BackgroundSpec, BoundingBox, ContainerFormat, PipelineResult, SegmentationJob},
};
use instant::Instant;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Runs segmentation jobs against one configuration
///
/// Jobs are independent: each loads its own model and owns its work
/// directory, so one pipeline may run several jobs concurrently as long as
/// their work directories differ.
#[derive(Clone)]
pub struct SegmentationPipeline {
    config: PipelineConfig,
    media: MediaToolAdapter,
    factory: Arc<dyn SegmenterFactory>,
}

impl std::fmt::Debug for SegmentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationPipeline")
            .field("config", &self.config)
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

impl SegmentationPipeline {
    /// Pipeline with the external media tool and the default model loader
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let media = MediaToolAdapter::from_config(&config.tools);
        Self::with_components(config, media, Arc::new(DefaultSegmenterFactory::default()))
    }

    /// Pipeline with caller-supplied media and model components
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_components(
        config: PipelineConfig,
        media: MediaToolAdapter,
        factory: Arc<dyn SegmenterFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            media,
            factory,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn media(&self) -> &MediaToolAdapter {
        &self.media
    }

    /// Run a job to completion.
    ///
    /// The returned path may differ in extension from `job.output_path` when
    /// the alpha encode had to be downgraded.
    ///
    /// # Errors
    /// A `Stage` error naming the state the job failed in
    #[instrument(
        skip(self, job),
        fields(
            job_id = %job.job_id,
            background = %job.background,
            source = %job.source_video.display()
        )
    )]
    pub async fn run(&self, job: &SegmentationJob) -> Result<PipelineResult> {
        let started = Instant::now();
        info!("Starting segmentation job");

        let mut store = self.init(job).map_err(|e| e.at_stage(JobStage::Init))?;
        let mut rotated_copy = None;

        let outcome = self
            .execute(job, &mut store, &mut rotated_copy, started)
            .await;

        let cleanup = self.cleanup(&store, rotated_copy.as_deref(), outcome.is_ok());

        match (outcome, cleanup) {
            (Ok(result), Ok(())) => {
                info!(
                    output = %result.output_path.display(),
                    frames = result.frame_count,
                    device = %result.device,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Segmentation job finished"
                );
                Ok(result)
            },
            (Ok(_), Err(e)) => Err(e.at_stage(JobStage::Cleanup)),
            (Err(e), cleanup) => {
                if let Err(cleanup_error) = cleanup {
                    warn!(error = %cleanup_error, "Cleanup after failed job also failed");
                }
                tracing::error!(stage = ?e.stage(), error = %e, "Segmentation job failed");
                Err(e)
            },
        }
    }

    fn init(&self, job: &SegmentationJob) -> Result<FrameStore> {
        if !job.source_video.is_file() {
            return Err(SegmentationError::JobNotFound(format!(
                "{} ({})",
                job.job_id,
                job.source_video.display()
            )));
        }
        // Range errors must surface before any tool is touched
        job.frame_range.validate()?;
        FrameStore::prepare(&job.work_dir)
    }

    async fn execute(
        &self,
        job: &SegmentationJob,
        store: &mut FrameStore,
        rotated_copy: &mut Option<PathBuf>,
        started: Instant,
    ) -> Result<PipelineResult> {
        let (video, copy) = self
            .media
            .probe_and_fix_rotation(&job.source_video, store.work_dir())
            .instrument(info_span!("rotation_check"))
            .await;
        if copy.is_some() {
            debug!(
                stage = %JobStage::RotationCheck,
                video = %video.display(),
                "Continuing with upright copy"
            );
        }
        *rotated_copy = copy;

        let (fps, frame_count) = self
            .media
            .decode_to_frames(&video, store, job.frame_range)
            .instrument(info_span!("decode"))
            .await
            .map_err(|e| e.at_stage(JobStage::Decode))?;
        info!(frames = frame_count, fps, "Decoded source video");

        let engine = MattingEngine::with_factory(self.factory.as_ref(), &self.config)
            .instrument(info_span!("model_ready"))
            .await
            .map_err(|e| e.at_stage(JobStage::ModelReady))?;
        let device = engine.device();

        let stats = self
            .process_frames(engine, store.clone(), job.bbox, job.background)
            .await
            .map_err(|e| e.at_stage(JobStage::PerFrame))?;
        debug!(
            frames = stats.frames_processed,
            average_ms = stats.average_frame_time.as_secs_f64() * 1000.0,
            "Per-frame stage done"
        );

        let output_path = self
            .encode(job, store, fps)
            .instrument(info_span!("encode"))
            .await
            .map_err(|e| e.at_stage(JobStage::Encode))?;

        let container_format = ContainerFormat::from_path(&output_path)
            .unwrap_or_else(|| job.background.container_format());
        if output_path != job.output_path {
            warn!(
                requested = %job.output_path.display(),
                actual = %output_path.display(),
                "Output written to a different path than requested"
            );
        }

        Ok(PipelineResult {
            output_path,
            container_format,
            requested_format: job.background.container_format(),
            requested_path: job.output_path.clone(),
            frame_count,
            fps,
            device: device.to_string(),
            elapsed: started.elapsed(),
        })
    }

    /// Predict, composite and store every raw frame in order on a blocking thread
    async fn process_frames(
        &self,
        mut engine: MattingEngine,
        store: FrameStore,
        bbox: BoundingBox,
        background: BackgroundSpec,
    ) -> Result<FrameProcessingStats> {
        let compositor = Compositor::new(background);
        let progress_interval = self.config.progress_interval.max(1);
        let span = info_span!("per_frame", device = %engine.device());

        tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            let frames = store.list_raw_frames()?;
            if frames.is_empty() {
                return Err(SegmentationError::empty_sequence("no raw frames to process"));
            }

            let total = frames.len();
            let mut stats = FrameProcessingStats::new();
            for (index, path) in frames.iter().enumerate() {
                let frame_start = Instant::now();
                let frame = image::open(path)?.to_rgb8();
                let mask = engine.predict(index, &frame, &bbox)?;
                let processed = compositor.composite(&frame, &mask)?;
                store.write_processed(index, &processed)?;
                stats.add_frame_time(frame_start.elapsed());

                let done = index + 1;
                if done % progress_interval == 0 || done == total {
                    info!(
                        frame = done,
                        total,
                        fps = stats.processing_fps(),
                        "Processed {done}/{total} frames"
                    );
                }
            }
            Ok(stats)
        })
        .await
        .map_err(|e| SegmentationError::internal(format!("Frame processing task failed: {e}")))?
    }

    async fn encode(&self, job: &SegmentationJob, store: &FrameStore, fps: f64) -> Result<PathBuf> {
        if let Some(parent) = job.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SegmentationError::file_io_error("create output directory", parent, &e)
            })?;
        }

        self.media
            .encode_from_frames(
                &store.processed_dir(),
                store.padding(),
                &job.output_path,
                fps,
                job.background.is_transparent(),
            )
            .await
    }

    /// The rotation copy always goes. The work directory goes on success, and
    /// on failure unless it is retained for diagnosis.
    fn cleanup(&self, store: &FrameStore, rotated_copy: Option<&Path>, succeeded: bool) -> Result<()> {
        let _span = info_span!("cleanup").entered();

        if let Some(copy) = rotated_copy {
            if copy.exists() {
                std::fs::remove_file(copy).map_err(|e| {
                    SegmentationError::file_io_error("remove rotation copy", copy, &e)
                })?;
            }
        }

        if succeeded || !self.config.retain_workdir_on_failure {
            store.purge()?;
        } else {
            warn!(work_dir = %store.work_dir().display(), "Keeping work directory of failed job");
        }
        Ok(())
    }

    /// Segment with a centred box covering most of the frame.
    ///
    /// The box keeps 15% horizontal and 10% vertical margins, sized from the
    /// upright frame dimensions (swapped for 90/270 degree sources).
    ///
    /// # Errors
    /// Same as [`SegmentationPipeline::run`]
    pub async fn auto_remove<S: Into<String>>(
        &self,
        job_id: S,
        source_video: &Path,
        background: BackgroundSpec,
        work_root: &Path,
        output_dir: &Path,
    ) -> Result<PipelineResult> {
        let info = self
            .media
            .probe_upright(source_video)
            .await
            .map_err(|e| e.at_stage(JobStage::Init))?;
        let bbox = BoundingBox::centered(info.width, info.height);
        debug!(?bbox, width = info.width, height = info.height, "Auto-remove box");

        let job = SegmentationJob::in_directories(
            job_id,
            source_video,
            bbox,
            background,
            work_root,
            output_dir,
        )
        .map_err(|e| e.at_stage(JobStage::Init))?;
        self.run(&job).await
    }

    /// Save the first frame of a video as an image, e.g. to pick a box
    ///
    /// # Errors
    /// - `UnreadableVideo` when no frame can be read
    #[instrument(skip(self), fields(video = %video.display()))]
    pub async fn extract_first_frame(&self, video: &Path, output: &Path) -> Result<()> {
        self.media.extract_first_frame(video, output).await
    }
}
