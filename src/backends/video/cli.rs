//! External `ffmpeg`/`ffprobe` driver (primary media path)
//!
//! Every invocation overwrites its outputs, runs with `-v error` so stderr only
//! carries real failures, and is bounded by the configured timeout. Expiry
//! kills the child process and is reported like any other tool failure.

use super::{
    frame::{frame_pattern, list_frames},
    EncodingProfile, MediaTool, StreamInfo, ToolFailure, ToolOutcome,
};
use crate::config::ToolConfig;
use crate::types::ResolvedRange;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Lines of stderr kept in a failure report
const STDERR_TAIL_LINES: usize = 20;

/// `ffmpeg`/`ffprobe` subprocess runner
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    config: ToolConfig,
}

impl FfmpegCli {
    #[must_use]
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    async fn run(&self, program: &Path, args: Vec<OsString>) -> ToolOutcome<Vec<u8>> {
        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("Executing {} {:?}", program.display(), args);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolOutcome::ToolFailed(ToolFailure::Unavailable(format!(
                    "{}: {e}",
                    program.display()
                )))
            },
        };

        let limit = self.config.timeout();
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Err(_) => {
                log::warn!("{} timed out after {}s", program.display(), limit.as_secs());
                ToolOutcome::ToolFailed(ToolFailure::TimedOut(limit))
            },
            Ok(Err(e)) => ToolOutcome::ToolFailed(ToolFailure::Invalid(format!(
                "failed to collect output of {}: {e}",
                program.display()
            ))),
            Ok(Ok(output)) if output.status.success() => ToolOutcome::Completed(output.stdout),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let lines: Vec<&str> = stderr.lines().collect();
                let tail = lines
                    .get(lines.len().saturating_sub(STDERR_TAIL_LINES)..)
                    .unwrap_or_default()
                    .join("\n");
                ToolOutcome::ToolFailed(ToolFailure::Exited {
                    code: output.status.code(),
                    stderr: tail,
                })
            },
        }
    }

    async fn ffmpeg(&self, args: Vec<OsString>) -> ToolOutcome<()> {
        self.run(&self.config.ffmpeg_path, args).await.map(|_| ())
    }

    async fn ffprobe(&self, args: Vec<OsString>) -> ToolOutcome<Vec<u8>> {
        self.run(&self.config.ffprobe_path, args).await
    }
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

pub(crate) fn rotation_probe_args(video: &Path) -> Vec<OsString> {
    let mut a = args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream_tags=rotate:stream_side_data=rotation",
        "-of",
        "default=nw=1:nk=1",
    ]);
    a.push(video.into());
    a
}

pub(crate) fn stream_probe_args(video: &Path) -> Vec<OsString> {
    let mut a = args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-show_entries",
        "stream=avg_frame_rate,r_frame_rate,nb_frames,nb_read_packets,width,height",
        "-of",
        "json",
    ]);
    a.push(video.into());
    a
}

pub(crate) fn extract_args(
    video: &Path,
    out_dir: &Path,
    range: ResolvedRange,
    padding: usize,
) -> Vec<OsString> {
    let mut a = args(["-y", "-v", "error", "-i"]);
    a.push(video.into());
    a.extend(args([
        "-vf".to_string(),
        format!("select=between(n\\,{}\\,{})", range.start, range.end),
        "-vsync".to_string(),
        "0".to_string(),
        "-start_number".to_string(),
        "0".to_string(),
    ]));
    a.push(out_dir.join(frame_pattern(padding)).into());
    a
}

pub(crate) fn encode_args(
    frames_dir: &Path,
    padding: usize,
    fps: f64,
    output: &Path,
    profile: &EncodingProfile,
) -> Vec<OsString> {
    let mut a = args([
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-framerate".to_string(),
        format!("{fps}"),
        "-start_number".to_string(),
        "0".to_string(),
        "-i".to_string(),
    ]);
    a.push(frames_dir.join(frame_pattern(padding)).into());
    a.extend(args(profile.ffmpeg_args()));
    a.push(output.into());
    a
}

/// First integer found in `ffprobe` rotation output; 0 when untagged
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn parse_rotation(stdout: &[u8]) -> i32 {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|degrees| degrees.is_finite())
        .map_or(0, |degrees| degrees.round() as i32)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

/// `"30000/1001"` style rate; `None` for `0/0` and other unusable values
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            num / den
        },
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_count(count: Option<&String>) -> Option<u64> {
    count
        .and_then(|c| c.trim().parse::<u64>().ok())
        .filter(|c| *c > 0)
}

/// Stream properties from `ffprobe -of json` output
pub(crate) fn parse_stream_info(stdout: &[u8]) -> std::result::Result<StreamInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("malformed ffprobe output: {e}"))?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| "no video stream".to_string())?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);
    let total_frames = parse_count(stream.nb_frames.as_ref())
        .or_else(|| parse_count(stream.nb_read_packets.as_ref()))
        .unwrap_or(0);

    Ok(StreamInfo {
        fps,
        total_frames,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

#[async_trait]
impl MediaTool for FfmpegCli {
    async fn probe_rotation(&self, video: &Path) -> ToolOutcome<i32> {
        self.ffprobe(rotation_probe_args(video))
            .await
            .map(|stdout| parse_rotation(&stdout))
    }

    async fn bake_rotation(&self, video: &Path, output: &Path) -> ToolOutcome<()> {
        let mut a = args(["-y", "-v", "error", "-i"]);
        a.push(video.into());
        a.extend(args(["-c:a", "copy"]));
        a.push(output.into());
        self.ffmpeg(a).await
    }

    async fn probe_stream(&self, video: &Path) -> ToolOutcome<StreamInfo> {
        match self.ffprobe(stream_probe_args(video)).await {
            ToolOutcome::Completed(stdout) => match parse_stream_info(&stdout) {
                Ok(info) => ToolOutcome::Completed(info),
                Err(reason) => ToolOutcome::ToolFailed(ToolFailure::Invalid(reason)),
            },
            ToolOutcome::ToolFailed(failure) => ToolOutcome::ToolFailed(failure),
        }
    }

    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        range: ResolvedRange,
        padding: usize,
    ) -> ToolOutcome<usize> {
        match self.ffmpeg(extract_args(video, out_dir, range, padding)).await {
            ToolOutcome::Completed(()) => match list_frames(out_dir) {
                Ok(frames) => ToolOutcome::Completed(frames.len()),
                Err(e) => ToolOutcome::ToolFailed(ToolFailure::Invalid(e.to_string())),
            },
            ToolOutcome::ToolFailed(failure) => ToolOutcome::ToolFailed(failure),
        }
    }

    async fn encode_frames(
        &self,
        frames_dir: &Path,
        padding: usize,
        fps: f64,
        output: &Path,
        profile: &EncodingProfile,
    ) -> ToolOutcome<()> {
        self.ffmpeg(encode_args(frames_dir, padding, fps, output, profile))
            .await
    }

    async fn extract_first_frame(&self, video: &Path, output: &Path) -> ToolOutcome<()> {
        let mut a = args(["-y", "-v", "error", "-ss", "0", "-i"]);
        a.push(video.into());
        a.extend(args(["-frames:v", "1", "-q:v", "2"]));
        a.push(output.into());
        self.ffmpeg(a).await
    }
}
