//! Audio output through the system's default device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{error, info, instrument};

use playout_media::OutputSpec;

use crate::error::AudioError;
use crate::output::{AudioCallback, AudioOutput};
use crate::AudioResult;

/// Plays through the default cpal output device.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// Open the default output device with its preferred configuration.
    #[instrument(name = "cpal_open")]
    pub fn open_default() -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()))?;

        let supported = device.default_output_config()?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(AudioError::FormatNotSupported(format!(
                "device prefers {:?}, only f32 output is supported",
                supported.sample_format()
            )));
        }

        let config = StreamConfig::from(supported);

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "Opened audio device"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn spec(&self) -> OutputSpec {
        OutputSpec {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    #[instrument(name = "cpal_start", skip(self, callback))]
    fn start(&mut self, mut callback: AudioCallback) -> AudioResult<()> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyStarted);
        }

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
            |err| error!("Audio stream error: {}", err),
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        info!("Audio output started");
        Ok(())
    }

    #[instrument(name = "cpal_stop", skip(self))]
    fn stop(&mut self) -> AudioResult<()> {
        match self.stream.take() {
            Some(stream) => {
                drop(stream);
                info!("Audio output stopped");
                Ok(())
            }
            None => Err(AudioError::NotStarted),
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}
