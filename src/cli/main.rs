//! Video background removal CLI
//!
//! Thin front end over [`SegmentationPipeline`]: every subcommand builds one
//! configuration, runs one operation and reports the outcome.

use super::config::CliConfigBuilder;
use crate::{
    backends::video::MediaToolAdapter,
    cache::WeightsCache,
    download::WeightsDownloader,
    matting::DefaultSegmenterFactory,
    processor::SegmentationPipeline,
    tracing_config::init_cli_tracing,
    types::{BackgroundSpec, BoundingBox, FrameRange, PipelineResult, SegmentationJob},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Box-prompted video background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "video-bgremove")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE, -vvv: TRACE including runtimes)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:coreml, tract:cpu)
    #[arg(short, long, global = true)]
    pub execution_provider: Option<String>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Use custom weights cache directory
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long, value_name = "PATH", global = true)]
    pub ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long, value_name = "PATH", global = true)]
    pub ffprobe: Option<PathBuf>,

    /// Time limit for each ffmpeg/ffprobe invocation, in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub tool_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Segment a video with a fixed bounding box
    Segment {
        #[command(flatten)]
        job: JobArgs,

        /// Box prompt as x0,y0,x1,y1 in source pixels
        #[arg(long, value_name = "X0,Y0,X1,Y1")]
        bbox: BoundingBox,
    },
    /// Segment with a centred box covering most of the frame
    AutoRemove {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Save the first frame of a video, e.g. to choose a box
    FirstFrame {
        input: PathBuf,
        output: PathBuf,
    },
    /// Download the model weights into the cache and exit
    DownloadWeights,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Source video
    pub input: PathBuf,

    /// "transparent" or a #RRGGBB color
    #[arg(short, long, default_value = "#00FF00")]
    pub background: BackgroundSpec,

    /// First frame to process (0-based)
    #[arg(long, default_value_t = 0)]
    pub frame_start: u64,

    /// Last frame to process, inclusive (0 = to the end)
    #[arg(long, default_value_t = 0)]
    pub frame_end: u64,

    /// Directory for the encoded result
    #[arg(short, long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Root for per-job scratch directories [default: system temp dir]
    #[arg(long, value_name = "PATH")]
    pub work_dir: Option<PathBuf>,

    /// Job id [default: random UUID]
    #[arg(long)]
    pub job_id: Option<String>,

    /// Keep the scratch directory when the job fails
    #[arg(long)]
    pub keep_work_dir: bool,
}

impl JobArgs {
    fn job_id(&self) -> String {
        self.job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    fn work_root(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("video-bgremove"))
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    debug!(?config, "Resolved configuration");

    match &cli.command {
        Command::Segment { job, bbox } => {
            let pipeline = build_pipeline(config)?;
            let segmentation_job = SegmentationJob::in_directories(
                job.job_id(),
                &job.input,
                *bbox,
                job.background,
                &job.work_root(),
                &job.output_dir,
            )?
            .with_frame_range(FrameRange::new(job.frame_start, job.frame_end));

            info!(job_id = %segmentation_job.job_id, "Segmenting {}", job.input.display());
            let result = pipeline.run(&segmentation_job).await?;
            report(&result);
        },
        Command::AutoRemove { job } => {
            if job.frame_start != 0 || job.frame_end != 0 {
                warn!("auto-remove always processes the whole video; frame range ignored");
            }
            let pipeline = build_pipeline(config)?;
            let result = pipeline
                .auto_remove(
                    job.job_id(),
                    &job.input,
                    job.background,
                    &job.work_root(),
                    &job.output_dir,
                )
                .await?;
            report(&result);
        },
        Command::FirstFrame { input, output } => {
            let pipeline = build_pipeline(config)?;
            pipeline.extract_first_frame(input, output).await?;
            println!("✅ First frame saved to {}", output.display());
        },
        Command::DownloadWeights => {
            let cache = WeightsCache::new(config.weights.cache_dir.clone())?;
            let downloader = WeightsDownloader::new(cache)?.with_progress(true);
            let paths = downloader.ensure_model(&config.weights).await?;
            println!("✅ Weights ready in {}", downloader.cache().cache_dir().display());
            println!("   Encoder: {}", paths.encoder.display());
            println!("   Decoder: {}", paths.decoder.display());
        },
    }

    Ok(())
}

fn build_pipeline(config: crate::config::PipelineConfig) -> Result<SegmentationPipeline> {
    let media = MediaToolAdapter::from_config(&config.tools);
    let factory = Arc::new(DefaultSegmenterFactory::with_progress(true));
    SegmentationPipeline::with_components(config, media, factory)
        .context("Failed to create segmentation pipeline")
}

fn report(result: &PipelineResult) {
    println!("✅ Output: {}", result.output_path.display());
    println!(
        "   {} frames at {:.2} fps on {} in {:.1}s",
        result.frame_count,
        result.fps,
        result.device,
        result.elapsed.as_secs_f64()
    );
    if result.format_changed() {
        println!(
            "⚠️  Requested {} but the alpha encode failed; wrote {} without transparency",
            result.requested_path.display(),
            result.container_format.mime_type()
        );
    }
}
