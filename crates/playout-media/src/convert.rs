//! Pixel and sample conversion.

use bytes::Bytes;

use crate::error::MediaError;
use crate::frame::{AudioBuffer, VideoBuffer};
use crate::MediaResult;

/// Device-side audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Resizes pictures for the display.
pub trait Scaler: Send {
    /// Produce a picture of `width × height`.
    fn scale(&mut self, input: &VideoBuffer, width: u32, height: u32) -> MediaResult<VideoBuffer>;
}

/// Converts decoded audio into the device format.
pub trait Resampler: Send {
    /// Convert `input` and append interleaved samples to `out`.
    fn resample(
        &mut self,
        input: &AudioBuffer,
        spec: OutputSpec,
        out: &mut Vec<f32>,
    ) -> MediaResult<()>;

    /// Forget interpolation history, e.g. after a seek.
    fn reset(&mut self) {}
}

/// Nearest-neighbour RGBA scaler. Same-size input is passed through untouched.
#[derive(Debug, Default)]
pub struct NearestScaler;

impl Scaler for NearestScaler {
    fn scale(&mut self, input: &VideoBuffer, width: u32, height: u32) -> MediaResult<VideoBuffer> {
        if !input.is_valid() {
            return Err(MediaError::Conversion(format!(
                "{}x{} buffer with stride {} holds only {} bytes",
                input.width,
                input.height,
                input.stride,
                input.data.len()
            )));
        }
        if width == 0 || height == 0 {
            return Err(MediaError::Conversion("target size must be non-zero".to_string()));
        }
        if input.width == width && input.height == height {
            return Ok(input.clone());
        }

        let mut data = Vec::with_capacity(VideoBuffer::rgba_buffer_size(width, height));
        for y in 0..height as usize {
            let src_y = y * input.height as usize / height as usize;
            let row = &input.data[src_y * input.stride..];
            for x in 0..width as usize {
                let src_x = x * input.width as usize / width as usize * 4;
                data.extend_from_slice(&row[src_x..src_x + 4]);
            }
        }
        Ok(VideoBuffer::packed(Bytes::from(data), width, height))
    }
}

/// Linear-interpolating resampler with channel up/down mixing.
///
/// Keeps the last input frame so consecutive buffers join without clicks.
#[derive(Debug, Default)]
pub struct LinearResampler {
    position: f64,
    last: Vec<f32>,
    // Per-frame scratch, sized once per channel layout.
    left: Vec<f32>,
    right: Vec<f32>,
}

impl LinearResampler {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Overwrite `last` in place with the final input frame.
fn remember_last(last: &mut Vec<f32>, frame: &[f32]) {
    last.clear();
    last.extend_from_slice(frame);
}

/// Map one input frame onto `out_channels`.
fn remix(frame: &[f32], out_channels: usize, out: &mut [f32]) {
    let in_channels = frame.len();
    if in_channels == out_channels {
        out.copy_from_slice(frame);
    } else if in_channels == 1 {
        out.fill(frame[0]);
    } else if out_channels == 1 {
        out[0] = frame.iter().sum::<f32>() / in_channels as f32;
    } else {
        for (ch, slot) in out.iter_mut().enumerate() {
            *slot = frame[ch.min(in_channels - 1)];
        }
    }
}

impl Resampler for LinearResampler {
    fn resample(
        &mut self,
        input: &AudioBuffer,
        spec: OutputSpec,
        out: &mut Vec<f32>,
    ) -> MediaResult<()> {
        if input.channels == 0 || input.sample_rate == 0 {
            return Err(MediaError::Conversion("input has no channels or rate".to_string()));
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(MediaError::Conversion("output has no channels or rate".to_string()));
        }

        let in_ch = usize::from(input.channels);
        let out_ch = usize::from(spec.channels);
        let frames = input.frames();
        if frames == 0 {
            return Ok(());
        }

        let Self {
            position,
            last,
            left: a,
            right: b,
        } = self;
        a.resize(out_ch, 0.0);
        b.resize(out_ch, 0.0);

        if input.sample_rate == spec.sample_rate {
            out.reserve(frames * out_ch);
            for frame in input.samples.chunks_exact(in_ch) {
                remix(frame, out_ch, a);
                out.extend_from_slice(a);
            }
            remember_last(last, &input.samples[(frames - 1) * in_ch..frames * in_ch]);
            return Ok(());
        }

        // position is measured in input frames, with -1 referring to `last`.
        let step = f64::from(input.sample_rate) / f64::from(spec.sample_rate);
        if last.len() != in_ch {
            remember_last(last, &input.samples[..in_ch]);
        }

        out.reserve(((frames as f64) / step).ceil() as usize * out_ch);
        while *position < (frames - 1) as f64 {
            let base = position.floor();
            let frac = (*position - base) as f32;
            let i = base as isize;

            let left: &[f32] = if i < 0 {
                &last[..]
            } else {
                &input.samples[i as usize * in_ch..(i as usize + 1) * in_ch]
            };
            let j = (i + 1) as usize;
            let right = &input.samples[j * in_ch..(j + 1) * in_ch];

            remix(left, out_ch, a);
            remix(right, out_ch, b);
            out.extend(a.iter().zip(b.iter()).map(|(l, r)| l + (r - l) * frac));

            *position += step;
        }

        *position -= frames as f64;
        remember_last(last, &input.samples[(frames - 1) * in_ch..frames * in_ch]);
        Ok(())
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.last.clear();
    }
}
