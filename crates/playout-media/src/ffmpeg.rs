//! FFmpeg-backed source for real media files.

use std::time::Duration;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{self, Pixel, Sample};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::frame::{audio::Audio as AudioFrame, video::Video as VideoFrame};
use ffmpeg::{codec, ChannelLayout, Packet};
use tracing::{debug, info, instrument, warn};

use crate::error::MediaError;
use crate::frame::{AudioBuffer, FramePayload, StreamKind, VideoBuffer};
use crate::source::{
    AudioStreamInfo, CompressedUnit, DecodeOutcome, DecodedFrame, MediaSource, ReadOutcome,
    SourceOptions, StreamInfo, VideoStreamInfo,
};
use crate::time::{Rational, Timestamp};
use crate::MediaResult;

/// Software scaler and resampler contexts, rebuilt when the input format changes.
#[derive(Default)]
struct Converters {
    scaler: Option<(scaling::Context, (Pixel, u32, u32))>,
    resampler: Option<(resampling::Context, (Sample, u16, u32))>,
}

// SAFETY: the contexts are owned by the source and only used from the thread
// currently driving it; `MediaSource` is never shared between threads.
unsafe impl Send for Converters {}

/// Demuxes and decodes a file with FFmpeg, emitting RGBA video and f32 audio.
pub struct FfmpegSource {
    input: format::context::Input,
    video_index: usize,
    audio_index: Option<usize>,
    video: ffmpeg::decoder::Video,
    audio: Option<ffmpeg::decoder::Audio>,
    converters: Converters,
    info: StreamInfo,
}

fn rational(value: ffmpeg::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

impl FfmpegSource {
    /// Open `path` and set up decoders for the best video and audio streams.
    #[instrument(name = "ffmpeg_open", skip(options))]
    pub fn open(path: &str, options: &SourceOptions) -> MediaResult<Self> {
        let open_failed = |reason: String| MediaError::OpenFailed {
            uri: path.to_string(),
            reason,
        };

        ffmpeg::init().map_err(|e| open_failed(format!("FFmpeg init failed: {e}")))?;
        let input = format::input(&path).map_err(|e| open_failed(e.to_string()))?;

        let (video_index, video, video_info) = {
            let stream = input
                .streams()
                .best(MediaType::Video)
                .ok_or(MediaError::NoVideoStream)?;
            let context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| MediaError::UnsupportedCodec(format!("video: {e}")))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| MediaError::UnsupportedCodec(format!("video: {e}")))?;

            let rate = stream.avg_frame_rate();
            let frame_rate = (rate.denominator() != 0 && rate.numerator() > 0)
                .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));

            let info = VideoStreamInfo {
                width: decoder.width(),
                height: decoder.height(),
                frame_rate,
                time_base: rational(stream.time_base()),
            };
            (stream.index(), decoder, info)
        };

        let mut audio_index = None;
        let mut audio = None;
        let mut audio_info = None;
        if options.decode_audio {
            if let Some(stream) = input.streams().best(MediaType::Audio) {
                let opened = codec::context::Context::from_parameters(stream.parameters())
                    .and_then(|context| context.decoder().audio());
                match opened {
                    Ok(decoder) => {
                        audio_info = Some(AudioStreamInfo {
                            sample_rate: decoder.rate(),
                            channels: decoder.channels(),
                            time_base: rational(stream.time_base()),
                        });
                        audio_index = Some(stream.index());
                        audio = Some(decoder);
                    }
                    Err(e) => warn!("Audio stream present but not decodable, playing video only: {}", e),
                }
            }
        }

        let duration = (input.duration() > 0)
            .then(|| Duration::from_micros(input.duration() as u64));

        let info = StreamInfo {
            video: video_info,
            audio: audio_info,
            duration,
        };

        info!(
            width = info.video.width,
            height = info.video.height,
            fps = ?info.video.frame_rate,
            audio = info.audio.is_some(),
            ?duration,
            "Media opened"
        );

        Ok(Self {
            input,
            video_index,
            audio_index,
            video,
            audio,
            converters: Converters::default(),
            info,
        })
    }

    fn to_packet(unit: &CompressedUnit) -> Packet {
        let mut packet = Packet::copy(&unit.data);
        packet.set_pts(unit.pts);
        packet.set_dts(unit.dts);
        packet.set_duration(unit.duration);
        if unit.keyframe {
            packet.set_flags(codec::packet::Flags::KEY);
        }
        packet
    }

    fn convert_video(&mut self, frame: &VideoFrame) -> MediaResult<VideoBuffer> {
        let (width, height) = (frame.width(), frame.height());
        let key = (frame.format(), width, height);

        if self.converters.scaler.as_ref().map(|(_, k)| *k) != Some(key) {
            let context = scaling::Context::get(
                frame.format(),
                width,
                height,
                Pixel::RGBA,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| MediaError::Conversion(format!("scaler: {e}")))?;
            debug!(?key, "Created scaler");
            self.converters.scaler = Some((context, key));
        }

        let mut rgba = VideoFrame::empty();
        if let Some((scaler, _)) = self.converters.scaler.as_mut() {
            scaler
                .run(frame, &mut rgba)
                .map_err(|e| MediaError::Conversion(format!("scale: {e}")))?;
        }

        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let plane = rgba.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&plane[y * stride..y * stride + row]);
        }
        Ok(VideoBuffer::packed(Bytes::from(data), width, height))
    }

    fn convert_audio(&mut self, frame: &AudioFrame) -> MediaResult<AudioBuffer> {
        let channels = frame.channels();
        let rate = frame.rate();
        let key = (frame.format(), channels, rate);
        let layout = if frame.channel_layout().is_empty() {
            ChannelLayout::default(i32::from(channels))
        } else {
            frame.channel_layout()
        };

        if self.converters.resampler.as_ref().map(|(_, k)| *k) != Some(key) {
            let context = resampling::Context::get(
                frame.format(),
                layout,
                rate,
                Sample::F32(SampleType::Packed),
                layout,
                rate,
            )
            .map_err(|e| MediaError::Conversion(format!("resampler: {e}")))?;
            debug!(?key, "Created resampler");
            self.converters.resampler = Some((context, key));
        }

        let mut packed = AudioFrame::empty();
        if let Some((resampler, _)) = self.converters.resampler.as_mut() {
            resampler
                .run(frame, &mut packed)
                .map_err(|e| MediaError::Conversion(format!("resample: {e}")))?;
        }

        let count = packed.samples() * usize::from(channels);
        let samples = packed.data(0)[..count * 4]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(AudioBuffer {
            samples,
            sample_rate: rate,
            channels,
        })
    }

    fn decode_video(&mut self, packet: &Packet) -> MediaResult<Vec<DecodedFrame>> {
        self.video.send_packet(packet)?;
        let time_base = self.info.video.time_base;

        let mut frames = Vec::new();
        loop {
            let mut decoded = VideoFrame::empty();
            match self.video.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
                    let buffer = self.convert_video(&decoded)?;
                    frames.push(DecodedFrame {
                        pts: Timestamp::new(pts, time_base),
                        payload: FramePayload::Video(buffer),
                    });
                }
                Err(e) if is_again(&e) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(frames)
    }

    fn decode_audio(&mut self, packet: &Packet) -> MediaResult<Vec<DecodedFrame>> {
        let Some(time_base) = self.info.audio.as_ref().map(|a| a.time_base) else {
            return Ok(Vec::new());
        };
        let Some(decoder) = self.audio.as_mut() else {
            return Ok(Vec::new());
        };
        decoder.send_packet(packet)?;

        let mut decoded_frames = Vec::new();
        loop {
            let mut decoded = AudioFrame::empty();
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => decoded_frames.push(decoded),
                Err(e) if is_again(&e) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        let mut frames = Vec::with_capacity(decoded_frames.len());
        for decoded in decoded_frames {
            let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            let buffer = self.convert_audio(&decoded)?;
            frames.push(DecodedFrame {
                pts: Timestamp::new(pts, time_base),
                payload: FramePayload::Audio(buffer),
            });
        }
        Ok(frames)
    }
}

impl MediaSource for FfmpegSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_next_unit(&mut self) -> MediaResult<ReadOutcome> {
        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {
                    let index = packet.stream();
                    let kind = if index == self.video_index {
                        StreamKind::Video
                    } else if Some(index) == self.audio_index {
                        StreamKind::Audio
                    } else {
                        continue;
                    };

                    return Ok(ReadOutcome::Unit(CompressedUnit {
                        kind,
                        data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
                        pts: packet.pts(),
                        dts: packet.dts(),
                        duration: packet.duration(),
                        keyframe: packet.is_key(),
                    }));
                }
                Err(ffmpeg::Error::Eof) => return Ok(ReadOutcome::EndOfStream),
                Err(e) => return Err(MediaError::Read(e.to_string())),
            }
        }
    }

    fn decode(&mut self, unit: CompressedUnit) -> MediaResult<DecodeOutcome> {
        let packet = Self::to_packet(&unit);
        let frames = match unit.kind {
            StreamKind::Video => self.decode_video(&packet)?,
            StreamKind::Audio => self.decode_audio(&packet)?,
        };

        if frames.is_empty() {
            Ok(DecodeOutcome::NeedMoreInput)
        } else {
            Ok(DecodeOutcome::Frames(frames))
        }
    }

    fn seek(&mut self, position: Duration) -> MediaResult<()> {
        let target = i64::try_from(position.as_micros()).unwrap_or(i64::MAX);
        self.input
            .seek(target, ..target)
            .map_err(|e| MediaError::Seek(e.to_string()))?;
        self.flush();
        Ok(())
    }

    fn flush(&mut self) {
        self.video.flush();
        if let Some(audio) = self.audio.as_mut() {
            audio.flush();
        }
    }
}
