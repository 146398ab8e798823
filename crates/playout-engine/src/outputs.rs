//! Construction of the audio and video outputs.

use playout_audio::{AudioOutput, HeadlessOutput, CHANNELS, SAMPLE_RATE};
use playout_ipc::PlayerConfig;
use playout_media::{OutputSpec, VideoStreamInfo};

use crate::display::{HeadlessDisplay, VideoOutput};
use crate::PlayerResult;

/// Opens the device-facing ends of the pipeline.
///
/// The player asks for each output during its startup phases, so a
/// failure rolls back whatever was opened before it.
pub trait OutputFactory {
    fn open_audio(&self, config: &PlayerConfig) -> PlayerResult<Box<dyn AudioOutput>>;

    fn open_display(&self, video: &VideoStreamInfo) -> PlayerResult<Box<dyn VideoOutput>>;
}

/// Outputs with no device behind them.
///
/// Audio is paced by a thread at device cadence, so sync still works.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessOutputs;

impl OutputFactory for HeadlessOutputs {
    fn open_audio(&self, config: &PlayerConfig) -> PlayerResult<Box<dyn AudioOutput>> {
        let spec = OutputSpec {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        };
        Ok(Box::new(HeadlessOutput::new(spec, config.audio_buffer_frames)))
    }

    fn open_display(&self, video: &VideoStreamInfo) -> PlayerResult<Box<dyn VideoOutput>> {
        Ok(Box::new(HeadlessDisplay::new(video.width, video.height)))
    }
}
