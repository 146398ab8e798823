//! A generated test pattern source.
//!
//! URIs look like `testsrc:duration=2,fps=25,size=160x90,rate=48000,channels=2`.
//! Every key is optional. Video is a moving gradient, audio a sine tone.

use std::f32::consts::TAU;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::MediaError;
use crate::frame::{AudioBuffer, FramePayload, StreamKind, VideoBuffer};
use crate::source::{
    AudioStreamInfo, CompressedUnit, DecodeOutcome, DecodedFrame, MediaSource, ReadOutcome,
    SourceOptions, StreamInfo, VideoStreamInfo,
};
use crate::time::{Rational, Timestamp};
use crate::MediaResult;

/// URI scheme handled by [`SyntheticSource`].
pub const SCHEME: &str = "testsrc:";

/// Parameters of a synthetic source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    /// Media length in seconds.
    pub duration: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames per audio unit.
    pub audio_frames_per_unit: u32,
    pub tone_hz: f32,
    pub audio: bool,
    /// Every Nth unit fails to decode. Zero disables.
    pub corrupt_every: u64,
    /// Every Nth read fails. Zero disables.
    pub read_error_every: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            duration: 2.0,
            fps: 25,
            width: 160,
            height: 90,
            sample_rate: 48_000,
            channels: 2,
            audio_frames_per_unit: 1024,
            tone_hz: 440.0,
            audio: true,
            corrupt_every: 0,
            read_error_every: 0,
        }
    }
}

impl SyntheticParams {
    /// Parse a `testsrc:` URI.
    pub fn parse(uri: &str) -> MediaResult<Self> {
        let invalid = |reason: String| MediaError::InvalidUri {
            uri: uri.to_string(),
            reason,
        };

        let body = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid(format!("expected '{SCHEME}' prefix")))?;

        let mut params = Self::default();
        for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("'{pair}' is not key=value")))?;

            match key {
                "duration" => params.duration = parse_number(uri, key, value)?,
                "fps" => params.fps = parse_number(uri, key, value)?,
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| invalid(format!("size must be WxH, got {value}")))?;
                    params.width = parse_number(uri, key, w)?;
                    params.height = parse_number(uri, key, h)?;
                }
                "rate" => params.sample_rate = parse_number(uri, key, value)?,
                "channels" => params.channels = parse_number(uri, key, value)?,
                "chunk" => params.audio_frames_per_unit = parse_number(uri, key, value)?,
                "tone" => params.tone_hz = parse_number(uri, key, value)?,
                "audio" => params.audio = matches!(value, "1" | "true" | "yes"),
                "corrupt_every" => params.corrupt_every = parse_number(uri, key, value)?,
                "read_error_every" => params.read_error_every = parse_number(uri, key, value)?,
                other => return Err(invalid(format!("unknown key '{other}'"))),
            }
        }

        if !(params.duration.is_finite() && params.duration > 0.0) {
            return Err(invalid("duration must be positive".to_string()));
        }
        if params.fps == 0 || params.width == 0 || params.height == 0 {
            return Err(invalid("fps and size must be non-zero".to_string()));
        }
        if params.audio
            && (params.sample_rate == 0 || params.channels == 0 || params.audio_frames_per_unit == 0)
        {
            return Err(invalid("audio rate, channels and chunk must be non-zero".to_string()));
        }

        Ok(params)
    }

    fn video_frame_count(&self) -> u64 {
        (self.duration * f64::from(self.fps)).ceil() as u64
    }

    fn audio_unit_count(&self) -> u64 {
        let total = (self.duration * f64::from(self.sample_rate)).ceil() as u64;
        total.div_ceil(u64::from(self.audio_frames_per_unit))
    }
}

fn parse_number<T: FromStr>(uri: &str, key: &str, text: &str) -> MediaResult<T> {
    text.parse().map_err(|_| MediaError::InvalidUri {
        uri: uri.to_string(),
        reason: format!("bad value for '{key}': {text}"),
    })
}

/// Generates interleaved audio and video units in presentation order.
pub struct SyntheticSource {
    params: SyntheticParams,
    info: StreamInfo,
    next_video: u64,
    next_audio: u64,
    reads: u64,
    units: u64,
}

impl SyntheticSource {
    pub fn open(uri: &str, options: &SourceOptions) -> MediaResult<Self> {
        let mut params = SyntheticParams::parse(uri)?;
        params.audio &= options.decode_audio;
        Ok(Self::with_params(params))
    }

    pub fn with_params(params: SyntheticParams) -> Self {
        let info = StreamInfo {
            video: VideoStreamInfo {
                width: params.width,
                height: params.height,
                frame_rate: Some(f64::from(params.fps)),
                time_base: Rational::new(1, params.fps as i32),
            },
            audio: params.audio.then(|| AudioStreamInfo {
                sample_rate: params.sample_rate,
                channels: params.channels,
                time_base: Rational::new(1, params.sample_rate as i32),
            }),
            duration: Some(Duration::from_secs_f64(params.duration)),
        };

        debug!(?params, "Synthetic source opened");

        Self {
            params,
            info,
            next_video: 0,
            next_audio: 0,
            reads: 0,
            units: 0,
        }
    }

    pub fn params(&self) -> &SyntheticParams {
        &self.params
    }

    fn video_pts_secs(&self, index: u64) -> f64 {
        index as f64 / f64::from(self.params.fps)
    }

    fn audio_pts_secs(&self, index: u64) -> f64 {
        (index * u64::from(self.params.audio_frames_per_unit)) as f64
            / f64::from(self.params.sample_rate)
    }

    fn render_video(&self, index: u64) -> VideoBuffer {
        let (width, height) = (self.params.width, self.params.height);
        let mut data = Vec::with_capacity(VideoBuffer::rgba_buffer_size(width, height));
        let shift = (index * 4) as u32;
        for y in 0..height {
            for x in 0..width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift / 2) % 256) as u8);
                data.push((index % 256) as u8);
                data.push(0xff);
            }
        }
        VideoBuffer::packed(Bytes::from(data), width, height)
    }

    fn render_audio(&self, index: u64) -> AudioBuffer {
        let rate = u64::from(self.params.sample_rate);
        let channels = usize::from(self.params.channels);
        let total = (self.params.duration * rate as f64).ceil() as u64;
        let start = index * u64::from(self.params.audio_frames_per_unit);
        let frames = u64::from(self.params.audio_frames_per_unit).min(total.saturating_sub(start));

        let mut samples = Vec::with_capacity(frames as usize * channels);
        for n in start..start + frames {
            let phase = (n % rate) as f32 / rate as f32;
            let value = (TAU * self.params.tone_hz * phase).sin() * 0.25;
            samples.extend(std::iter::repeat(value).take(channels));
        }

        AudioBuffer {
            samples,
            sample_rate: self.params.sample_rate,
            channels: self.params.channels,
        }
    }
}

impl MediaSource for SyntheticSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_next_unit(&mut self) -> MediaResult<ReadOutcome> {
        self.reads += 1;
        if self.params.read_error_every > 0 && self.reads % self.params.read_error_every == 0 {
            return Err(MediaError::Read(format!("injected read failure #{}", self.reads)));
        }

        let video_left = self.next_video < self.params.video_frame_count();
        let audio_left = self.params.audio && self.next_audio < self.params.audio_unit_count();

        let kind = match (video_left, audio_left) {
            (false, false) => return Ok(ReadOutcome::EndOfStream),
            (true, false) => StreamKind::Video,
            (false, true) => StreamKind::Audio,
            (true, true) => {
                if self.audio_pts_secs(self.next_audio) <= self.video_pts_secs(self.next_video) {
                    StreamKind::Audio
                } else {
                    StreamKind::Video
                }
            }
        };

        let (index, pts) = match kind {
            StreamKind::Video => {
                let index = self.next_video;
                self.next_video += 1;
                (index, index as i64)
            }
            StreamKind::Audio => {
                let index = self.next_audio;
                self.next_audio += 1;
                (index, (index * u64::from(self.params.audio_frames_per_unit)) as i64)
            }
        };

        self.units += 1;
        let corrupt = self.params.corrupt_every > 0 && self.units % self.params.corrupt_every == 0;
        let data = if corrupt {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(&index.to_le_bytes())
        };

        Ok(ReadOutcome::Unit(CompressedUnit {
            kind,
            data,
            pts: Some(pts),
            dts: Some(pts),
            duration: 1,
            keyframe: true,
        }))
    }

    fn decode(&mut self, unit: CompressedUnit) -> MediaResult<DecodeOutcome> {
        let bytes: [u8; 8] = unit
            .data
            .as_ref()
            .try_into()
            .map_err(|_| MediaError::Decode(format!("corrupt {} unit", unit.kind.name())))?;
        let index = u64::from_le_bytes(bytes);

        let frame = match unit.kind {
            StreamKind::Video => DecodedFrame {
                pts: Timestamp::new(index as i64, self.info.video.time_base),
                payload: FramePayload::Video(self.render_video(index)),
            },
            StreamKind::Audio => {
                let time_base = match &self.info.audio {
                    Some(audio) => audio.time_base,
                    None => return Ok(DecodeOutcome::NeedMoreInput),
                };
                DecodedFrame {
                    pts: Timestamp::new(unit.pts.unwrap_or_default(), time_base),
                    payload: FramePayload::Audio(self.render_audio(index)),
                }
            }
        };

        Ok(DecodeOutcome::Frames(vec![frame]))
    }

    fn seek(&mut self, position: Duration) -> MediaResult<()> {
        let secs = position.as_secs_f64();
        self.next_video = (secs * f64::from(self.params.fps)).floor() as u64;
        if self.params.audio {
            self.next_audio = (secs * f64::from(self.params.sample_rate)
                / f64::from(self.params.audio_frames_per_unit))
            .floor() as u64;
        }
        debug!(?position, video = self.next_video, audio = self.next_audio, "Synthetic seek");
        Ok(())
    }

    fn flush(&mut self) {}
}
