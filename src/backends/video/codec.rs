//! Video codec selection and encoding parameters
//!
//! Maps the two output modes onto concrete codec/pixel-format pairs and renders
//! them as external tool arguments.

use crate::types::ContainerFormat;
use std::fmt;

/// Video codec enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// H.264 codec (most compatible)
    H264,
    /// VP9 codec (WebM, supports an alpha plane)
    VP9,
    /// MPEG-4 Part 2 (built into libavcodec, used by the basic writer)
    Mpeg4,
}

impl VideoCodec {
    /// Get FFmpeg encoder name
    #[must_use]
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::VP9 => "libvpx-vp9",
            Self::Mpeg4 => "mpeg4",
        }
    }

    /// Get codec description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC - Most compatible, good quality",
            Self::VP9 => "VP9 - Open source, carries transparency in WebM",
            Self::Mpeg4 => "MPEG-4 Part 2 - Always available fallback",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ffmpeg_name())
    }
}

/// Pixel format for video encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 (most common)
    Yuv420p,
    /// YUV 4:2:0 with an alpha plane
    Yuva420p,
}

impl PixelFormat {
    /// Get FFmpeg pixel format name
    #[must_use]
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuva420p => "yuva420p",
        }
    }

    /// Check if format supports transparency
    #[must_use]
    pub fn supports_transparency(&self) -> bool {
        matches!(self, Self::Yuva420p)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ffmpeg_name())
    }
}

/// Everything the external encoder needs besides input and output paths
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingProfile {
    pub codec: VideoCodec,
    pub pixel_format: PixelFormat,
    pub container: ContainerFormat,
    /// Encoder preset (x264 only)
    pub preset: Option<&'static str>,
    /// Constant rate factor (x264 only)
    pub crf: Option<u8>,
    /// Target bitrate, e.g. "2M"
    pub bitrate: Option<&'static str>,
}

impl EncodingProfile {
    /// Browser-compatible H.264 at a fixed quality/speed tradeoff
    #[must_use]
    pub fn opaque() -> Self {
        Self {
            codec: VideoCodec::H264,
            pixel_format: PixelFormat::Yuv420p,
            container: ContainerFormat::Mp4,
            preset: Some("fast"),
            crf: Some(23),
            bitrate: None,
        }
    }

    /// VP9 with YUVA pixels in WebM
    #[must_use]
    pub fn alpha() -> Self {
        Self {
            codec: VideoCodec::VP9,
            pixel_format: PixelFormat::Yuva420p,
            container: ContainerFormat::WebM,
            preset: None,
            crf: None,
            bitrate: Some("2M"),
        }
    }

    #[must_use]
    pub fn for_alpha(alpha: bool) -> Self {
        if alpha {
            Self::alpha()
        } else {
            Self::opaque()
        }
    }

    #[must_use]
    pub fn supports_alpha(&self) -> bool {
        self.pixel_format.supports_transparency()
    }

    /// Encoder arguments placed between the input and the output path
    #[must_use]
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.container == ContainerFormat::Mp4 {
            // x264 with 4:2:0 chroma needs even dimensions
            args.push("-vf".to_string());
            args.push("scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string());
        }

        args.push("-c:v".to_string());
        args.push(self.codec.ffmpeg_name().to_string());
        args.push("-pix_fmt".to_string());
        args.push(self.pixel_format.ffmpeg_name().to_string());

        if let Some(preset) = self.preset {
            args.push("-preset".to_string());
            args.push(preset.to_string());
        }
        if let Some(crf) = self.crf {
            args.push("-crf".to_string());
            args.push(crf.to_string());
        }
        if let Some(bitrate) = self.bitrate {
            args.push("-b:v".to_string());
            args.push(bitrate.to_string());
        }

        match self.codec {
            // libvpx alt-ref frames drop the alpha plane
            VideoCodec::VP9 => {
                args.push("-auto-alt-ref".to_string());
                args.push("0".to_string());
            },
            VideoCodec::H264 => {
                args.push("-movflags".to_string());
                args.push("+faststart".to_string());
            },
            VideoCodec::Mpeg4 => {},
        }

        args
    }
}
