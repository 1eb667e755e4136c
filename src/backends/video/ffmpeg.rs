//! In-process decode/encode through the linked libav libraries
//!
//! This is the basic fallback used when the external tool is missing or
//! fails: a sequential packet/decode loop for reading and a plain MPEG-4 Part 2
//! writer for output, both using the ffmpeg-next crate.

use super::{frame::frame_file_name, BasicFrameIo, StreamInfo};
use crate::error::{Result, SegmentationError};
use crate::types::ResolvedRange;
use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, decoder, encoder, format, media, software::scaling, Rational};
use image::RgbImage;
use std::path::{Path, PathBuf};

fn libav_error(context: &str, e: ffmpeg::Error) -> SegmentationError {
    SegmentationError::tool_failed("libav", format!("{context}: {e}"))
}

/// Basic frame reader/writer backed by libav
#[derive(Debug, Clone, Copy)]
pub struct LibavFrameIo;

impl LibavFrameIo {
    /// Initialize the libav libraries
    ///
    /// # Errors
    /// - libav initialization failure
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| libav_error("Failed to initialize FFmpeg", e))?;
        Ok(Self)
    }

    fn open(video: &Path) -> Result<OpenedVideo> {
        let input = format::input(&video).map_err(|e| {
            SegmentationError::unreadable(format!("{}: {e}", video.display()))
        })?;

        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| {
                SegmentationError::unreadable(format!("{}: no video stream", video.display()))
            })?;
        let stream_index = stream.index();
        let recorded_frames = u64::try_from(stream.frames()).unwrap_or(0);
        let avg_rate = f64::from(stream.avg_frame_rate());
        let fps = if avg_rate.is_finite() && avg_rate > 0.0 {
            avg_rate
        } else {
            f64::from(stream.rate())
        };

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| libav_error("Failed to create codec context", e))?
            .decoder()
            .video()
            .map_err(|e| libav_error("Failed to create video decoder", e))?;

        Ok(OpenedVideo {
            input,
            stream_index,
            decoder,
            recorded_frames,
            fps,
        })
    }
}

struct OpenedVideo {
    input: format::context::Input,
    stream_index: usize,
    decoder: decoder::Video,
    recorded_frames: u64,
    fps: f64,
}

/// Converts decoded frames to packed RGB
struct RgbConverter {
    scaler: scaling::Context,
}

impl RgbConverter {
    fn for_decoder(decoder: &decoder::Video) -> Result<Self> {
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| libav_error("Failed to create frame scaler", e))?;
        Ok(Self { scaler })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| libav_error("Failed to convert frame to RGB", e))?;

        let (width, height) = (rgb.width(), rgb.height());
        let stride = rgb.stride(0);
        let row_bytes = width as usize * 3;
        let data = rgb.data(0);

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for y in 0..height as usize {
            let row = data
                .get(y * stride..y * stride + row_bytes)
                .ok_or_else(|| SegmentationError::internal("Decoded frame shorter than expected"))?;
            pixels.extend_from_slice(row);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| SegmentationError::internal("Decoded frame has inconsistent size"))
    }
}

/// Decode loop state: frame counter and the sink for frames in range
struct RangeDecoder<'a> {
    converter: RgbConverter,
    range: ResolvedRange,
    out_dir: &'a Path,
    padding: usize,
    index: u64,
    written: usize,
}

impl RangeDecoder<'_> {
    /// Drain decoded frames. Returns `true` once the range end has been passed.
    fn drain(&mut self, decoder: &mut decoder::Video) -> Result<bool> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            if self.index > self.range.end {
                return Ok(true);
            }
            if self.range.contains(self.index) {
                let image = self.converter.convert(&decoded)?;
                let path = self
                    .out_dir
                    .join(frame_file_name(self.written, self.padding));
                image.save(&path)?;
                self.written += 1;
            }
            self.index += 1;
        }
        Ok(self.index > self.range.end)
    }
}

impl BasicFrameIo for LibavFrameIo {
    fn probe(&self, video: &Path) -> Result<StreamInfo> {
        let mut opened = Self::open(video)?;

        let total_frames = if opened.recorded_frames > 0 {
            opened.recorded_frames
        } else {
            // Container does not record a frame count; count packets instead
            let index = opened.stream_index;
            opened
                .input
                .packets()
                .filter(|(stream, _)| stream.index() == index)
                .count() as u64
        };

        Ok(StreamInfo {
            fps: opened.fps,
            total_frames,
            width: opened.decoder.width(),
            height: opened.decoder.height(),
        })
    }

    fn decode_range(
        &self,
        video: &Path,
        out_dir: &Path,
        range: ResolvedRange,
        padding: usize,
    ) -> Result<usize> {
        let mut opened = Self::open(video)?;
        let mut sink = RangeDecoder {
            converter: RgbConverter::for_decoder(&opened.decoder)?,
            range,
            out_dir,
            padding,
            index: 0,
            written: 0,
        };

        let mut finished = false;
        for (stream, packet) in opened.input.packets() {
            if stream.index() != opened.stream_index {
                continue;
            }
            if let Err(e) = opened.decoder.send_packet(&packet) {
                log::warn!("Skipping undecodable packet: {e}");
                continue;
            }
            if sink.drain(&mut opened.decoder)? {
                finished = true;
                break;
            }
        }

        if !finished {
            opened.decoder.send_eof().ok();
            sink.drain(&mut opened.decoder)?;
        }

        log::info!(
            "Fallback decoder wrote {} frames from {}",
            sink.written,
            video.display()
        );

        if sink.written == 0 {
            return Err(SegmentationError::empty_sequence(format!(
                "no frames decoded from {}",
                video.display()
            )));
        }
        Ok(sink.written)
    }

    fn read_first_frame(&self, video: &Path) -> Result<RgbImage> {
        let mut opened = Self::open(video)?;
        let mut converter = RgbConverter::for_decoder(&opened.decoder)?;
        let mut decoded = ffmpeg::frame::Video::empty();

        for (stream, packet) in opened.input.packets() {
            if stream.index() != opened.stream_index {
                continue;
            }
            if opened.decoder.send_packet(&packet).is_err() {
                continue;
            }
            if opened.decoder.receive_frame(&mut decoded).is_ok() {
                return converter.convert(&decoded);
            }
        }

        opened.decoder.send_eof().ok();
        if opened.decoder.receive_frame(&mut decoded).is_ok() {
            return converter.convert(&decoded);
        }

        Err(SegmentationError::unreadable(format!(
            "{}: no decodable frame",
            video.display()
        )))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn encode(&self, frames: &[PathBuf], fps: f64, output: &Path) -> Result<()> {
        let first_path = frames.first().ok_or_else(|| {
            SegmentationError::empty_sequence(format!(
                "no frames to encode into {}",
                output.display()
            ))
        })?;

        // yuv420p needs even dimensions
        let first = image::open(first_path)?.to_rgb8();
        let width = (first.width() & !1).max(2);
        let height = (first.height() & !1).max(2);

        let mut octx = format::output(&output)
            .map_err(|e| libav_error("Failed to create output container", e))?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let codec = encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| SegmentationError::tool_failed("libav", "MPEG-4 encoder not available"))?;

        let frame_rate = Rational::from(fps);
        let encoder_time_base = frame_rate.invert();

        let (stream_index, mut encoder) = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| libav_error("Failed to add output stream", e))?;

            let mut video = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(|e| libav_error("Failed to create video encoder", e))?;
            video.set_width(width);
            video.set_height(height);
            video.set_format(format::Pixel::YUV420P);
            video.set_time_base(encoder_time_base);
            video.set_frame_rate(Some(frame_rate));
            if global_header {
                video.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            let opened = video
                .open_as(codec)
                .map_err(|e| libav_error("Failed to open MPEG-4 encoder", e))?;
            ost.set_parameters(&opened);
            ost.set_time_base(encoder_time_base);
            (ost.index(), opened)
        };

        octx.write_header()
            .map_err(|e| libav_error("Failed to write container header", e))?;
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| SegmentationError::internal("Output stream vanished"))?;

        let mut scaler = scaling::Context::get(
            format::Pixel::RGB24,
            width,
            height,
            format::Pixel::YUV420P,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| libav_error("Failed to create frame scaler", e))?;

        let write_packets = |encoder: &mut encoder::video::Encoder,
                                 octx: &mut format::context::Output|
         -> Result<()> {
            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(stream_index);
                packet.rescale_ts(encoder_time_base, stream_time_base);
                packet
                    .write_interleaved(octx)
                    .map_err(|e| libav_error("Failed to write packet", e))?;
            }
            Ok(())
        };

        for (pts, path) in frames.iter().enumerate() {
            let mut image = image::open(path)?.to_rgb8();
            if image.dimensions() != (width, height) {
                image = image::imageops::resize(
                    &image,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
            }

            let mut rgb = ffmpeg::frame::Video::new(format::Pixel::RGB24, width, height);
            let stride = rgb.stride(0);
            let row_bytes = width as usize * 3;
            let data = rgb.data_mut(0);
            for (y, row) in image.as_raw().chunks_exact(row_bytes).enumerate() {
                if let Some(dst) = data.get_mut(y * stride..y * stride + row_bytes) {
                    dst.copy_from_slice(row);
                }
            }

            let mut yuv = ffmpeg::frame::Video::empty();
            scaler
                .run(&rgb, &mut yuv)
                .map_err(|e| libav_error("Failed to convert frame to YUV", e))?;
            yuv.set_pts(Some(pts as i64));

            encoder
                .send_frame(&yuv)
                .map_err(|e| libav_error("Failed to send frame to encoder", e))?;
            write_packets(&mut encoder, &mut octx)?;
        }

        encoder
            .send_eof()
            .map_err(|e| libav_error("Failed to flush encoder", e))?;
        write_packets(&mut encoder, &mut octx)?;
        octx.write_trailer()
            .map_err(|e| libav_error("Failed to write container trailer", e))?;

        log::info!(
            "Fallback writer encoded {} frames ({}x{}, mpeg4) into {}",
            frames.len(),
            width,
            height,
            output.display()
        );
        Ok(())
    }
}

#[cfg(all(test, feature = "video-support"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_without_frames_is_empty_sequence() {
        let io = LibavFrameIo::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let err = io
            .encode(&[], 25.0, &temp_dir.path().join("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, SegmentationError::EmptyFrameSequence(_)));
    }

    #[test]
    fn test_corrupt_file_is_unreadable() {
        let io = LibavFrameIo::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();

        let err = io.read_first_frame(&path).unwrap_err();
        assert!(matches!(err, SegmentationError::UnreadableVideo(_)));
    }
}
