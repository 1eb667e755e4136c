//! Primary/fallback wiring for every media operation

use super::{
    decide, decide_encode, decide_extraction, decide_probe, decide_rotation, list_frames,
    padding_width, BasicFrameIo, EncodeStep, EncodingProfile, FallbackDecision, FfmpegCli,
    FrameStore, MediaTool, StreamInfo, ToolFailure,
};
use crate::config::ToolConfig;
use crate::error::{Result, SegmentationError};
use crate::types::{ContainerFormat, FrameRange};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Media operations with a transparent fallback for each of them
///
/// Fallbacks never surface as errors; only a failure of both paths does.
#[derive(Clone)]
pub struct MediaToolAdapter {
    tool: Arc<dyn MediaTool>,
    fallback: Option<Arc<dyn BasicFrameIo>>,
}

impl std::fmt::Debug for MediaToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaToolAdapter")
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl MediaToolAdapter {
    pub fn new(tool: Arc<dyn MediaTool>, fallback: Option<Arc<dyn BasicFrameIo>>) -> Self {
        Self { tool, fallback }
    }

    /// External `ffmpeg`/`ffprobe` with the in-process libav fallback when compiled in
    #[must_use]
    pub fn from_config(tools: &ToolConfig) -> Self {
        let tool: Arc<dyn MediaTool> = Arc::new(FfmpegCli::new(tools.clone()));
        Self::new(tool, Self::default_fallback())
    }

    #[cfg(feature = "video-support")]
    fn default_fallback() -> Option<Arc<dyn BasicFrameIo>> {
        match super::LibavFrameIo::new() {
            Ok(io) => Some(Arc::new(io)),
            Err(e) => {
                log::warn!("In-process decoder unavailable, running without fallback: {e}");
                None
            },
        }
    }

    #[cfg(not(feature = "video-support"))]
    fn default_fallback() -> Option<Arc<dyn BasicFrameIo>> {
        None
    }

    /// Run a blocking fallback operation, or report the primary failure when
    /// there is no fallback.
    async fn run_fallback<T, F>(&self, operation: &str, failure: ToolFailure, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BasicFrameIo) -> Result<T> + Send + 'static,
    {
        let Some(io) = self.fallback.clone() else {
            return Err(failure_to_error(operation, failure));
        };
        log::warn!("{operation}: primary tool failed ({failure}), using in-process fallback");

        tokio::task::spawn_blocking(move || f(io.as_ref()))
            .await
            .map_err(|e| SegmentationError::internal(format!("{operation} fallback task failed: {e}")))?
    }

    /// Bake non-zero rotation metadata into a copy inside `dir`.
    ///
    /// Returns the path to continue with and the copy to delete afterwards, if
    /// one was made. Probe or re-encode failures keep the original.
    pub async fn probe_and_fix_rotation(
        &self,
        video: &Path,
        dir: &Path,
    ) -> (PathBuf, Option<PathBuf>) {
        let Some(degrees) = decide_rotation(self.tool.probe_rotation(video).await) else {
            return (video.to_path_buf(), None);
        };

        let name = video
            .file_name()
            .map_or_else(|| "video.mp4".into(), |n| n.to_string_lossy().into_owned());
        let copy = dir.join(format!("rotated_{name}"));
        log::info!("Rotation {degrees} on {}, re-encoding upright copy", video.display());

        match decide(self.tool.bake_rotation(video, &copy).await) {
            FallbackDecision::Use(()) => (copy.clone(), Some(copy)),
            FallbackDecision::Fallback(failure) => {
                log::warn!("Rotation fix failed, keeping original: {failure}");
                remove_partial(&copy);
                (video.to_path_buf(), None)
            },
        }
    }

    /// Stream properties of `video`
    ///
    /// # Errors
    /// - Both probes failed
    pub async fn probe(&self, video: &Path) -> Result<StreamInfo> {
        match decide_probe(self.tool.probe_stream(video).await) {
            FallbackDecision::Use(info) => Ok(info),
            FallbackDecision::Fallback(failure) => {
                let video = video.to_path_buf();
                self.run_fallback("probe", failure, move |io| io.probe(&video))
                    .await
            },
        }
    }

    /// Stream properties with width and height as the frames will be decoded.
    ///
    /// Quarter-turn rotation metadata swaps the dimensions, since decoding
    /// runs on the rotation-baked copy.
    ///
    /// # Errors
    /// - Both probes failed
    pub async fn probe_upright(&self, video: &Path) -> Result<StreamInfo> {
        let info = self.probe(video).await?;
        match decide_rotation(self.tool.probe_rotation(video).await) {
            Some(degrees) if degrees.rem_euclid(180) == 90 => Ok(StreamInfo {
                width: info.height,
                height: info.width,
                ..info
            }),
            _ => Ok(info),
        }
    }

    /// Decode `range` of `video` into the store's `raw/` directory.
    ///
    /// Returns the frame rate and the number of frames written.
    ///
    /// # Errors
    /// - `InvalidFrameRange` for inverted ranges, before any tool runs
    /// - `EmptyFrameSequence` when no frame could be decoded
    /// - Failures of both decode paths
    pub async fn decode_to_frames(
        &self,
        video: &Path,
        store: &mut FrameStore,
        range: FrameRange,
    ) -> Result<(f64, usize)> {
        range.validate()?;

        let info = self.probe(video).await?;
        let resolved = range.resolve(info.total_frames)?;
        store.set_total_frames(info.total_frames);

        let raw_dir = store.raw_dir();
        let outcome = self
            .tool
            .extract_frames(video, &raw_dir, resolved, store.padding())
            .await;

        let failure = match decide_extraction(outcome) {
            FallbackDecision::Use(count) => {
                log::info!(
                    "Decoded {count} frames ({}..={}) at {:.3} fps",
                    resolved.start,
                    resolved.end,
                    info.fps
                );
                return Ok((info.fps, count));
            },
            FallbackDecision::Fallback(failure) => failure,
        };

        // Drop whatever the failed attempt left behind
        for partial in list_frames(&raw_dir)? {
            remove_partial(&partial);
        }

        let video = video.to_path_buf();
        let (info, count) = self
            .run_fallback("decode", failure, move |io| {
                let info = io.probe(&video)?;
                let resolved = range.resolve(info.total_frames)?;
                let count = io.decode_range(
                    &video,
                    &raw_dir,
                    resolved,
                    padding_width(info.total_frames),
                )?;
                Ok((info, count))
            })
            .await?;

        store.set_total_frames(info.total_frames);
        if count == 0 {
            return Err(SegmentationError::empty_sequence("decode produced no frames"));
        }
        Ok((info.fps, count))
    }

    /// Encode the numbered frames of `frames_dir` into a video.
    ///
    /// Returns the path actually written. Alpha output always goes to `.webm`;
    /// when the alpha encode fails the result is an `.mp4` instead, so callers
    /// must look at the returned extension.
    ///
    /// # Errors
    /// - `EmptyFrameSequence` when `frames_dir` holds no frames
    /// - Failures of every encode path
    pub async fn encode_from_frames(
        &self,
        frames_dir: &Path,
        padding: usize,
        output: &Path,
        fps: f64,
        alpha: bool,
    ) -> Result<PathBuf> {
        let frames = list_frames(frames_dir)?;
        if frames.is_empty() {
            return Err(SegmentationError::empty_sequence(format!(
                "no processed frames in {}",
                frames_dir.display()
            )));
        }

        let mut profile = EncodingProfile::for_alpha(alpha);
        let mut target = output.with_extension(profile.container.extension());
        if target != output {
            log::info!(
                "Output path rewritten to {} for {} container",
                target.display(),
                profile.container.extension()
            );
        }

        loop {
            log::debug!(
                "Encoding {} with {}",
                target.display(),
                profile.codec.description()
            );
            let outcome = self
                .tool
                .encode_frames(frames_dir, padding, fps, &target, &profile)
                .await;

            match decide_encode(profile.supports_alpha(), outcome) {
                EncodeStep::Finished => {
                    log::info!(
                        "Encoded {} frames with {} into {}",
                        frames.len(),
                        profile.codec,
                        target.display()
                    );
                    return Ok(target);
                },
                EncodeStep::DowngradeToOpaque(failure) => {
                    log::warn!("Alpha encode failed, downgrading to opaque MP4: {failure}");
                    remove_partial(&target);
                    profile = EncodingProfile::opaque();
                    target = output.with_extension(ContainerFormat::Mp4.extension());
                },
                EncodeStep::BasicWriter(failure) => {
                    remove_partial(&target);
                    let written = target.clone();
                    self.run_fallback("encode", failure, move |io| {
                        io.encode(&frames, fps, &written)
                    })
                    .await
                    .map_err(|e| {
                        remove_partial(&target);
                        e
                    })?;
                    return Ok(target);
                },
            }
        }
    }

    /// Save the first frame of `video` as an image.
    ///
    /// # Errors
    /// - `UnreadableVideo` when neither path could read a frame
    pub async fn extract_first_frame(&self, video: &Path, output: &Path) -> Result<()> {
        let failure = match decide(self.tool.extract_first_frame(video, output).await) {
            FallbackDecision::Use(()) => return Ok(()),
            FallbackDecision::Fallback(failure) => failure,
        };
        remove_partial(output);

        let (source, target) = (video.to_path_buf(), output.to_path_buf());
        self.run_fallback("first frame", failure, move |io| {
            io.read_first_frame(&source)?.save(&target)?;
            Ok(())
        })
        .await
        .map_err(|e| match e {
            SegmentationError::UnreadableVideo(_) => e,
            other => SegmentationError::unreadable(format!("{}: {other}", video.display())),
        })
    }
}

fn failure_to_error(operation: &str, failure: ToolFailure) -> SegmentationError {
    match failure {
        ToolFailure::Unavailable(reason) => {
            SegmentationError::ToolUnavailable(format!("{operation}: {reason}"))
        },
        other => SegmentationError::tool_failed("ffmpeg", format!("{operation}: {other}")),
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove partial output {}: {e}", path.display());
        }
    }
}
