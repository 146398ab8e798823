//! Command line arguments and how they combine with the config file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use playout_ipc::PlayerConfig;

/// Loop a media file and accept remote commands over a websocket.
#[derive(Debug, Parser)]
#[command(name = "playout", version, about)]
pub struct Cli {
    /// Media file path, or a `testsrc:` URI for the built-in generator.
    pub media: String,

    /// Control channel port.
    pub port: Option<u16>,

    /// Control channel bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// JSON config file. Keys it omits keep their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial volume, 0-100.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Do not open an audio device. Video paces itself on the wall clock.
    #[arg(long)]
    pub no_audio: bool,
}

impl Cli {
    /// Config file (or defaults) with command line overrides applied.
    pub fn player_config(&self) -> Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PlayerConfig::default(),
        };

        if let Some(port) = self.port {
            config.control_port = port;
        }
        if let Some(bind) = &self.bind {
            config.control_bind = bind.clone();
        }
        if let Some(volume) = self.volume {
            config.initial_volume = volume;
        }
        if self.no_audio {
            config.audio_enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_positional_port() {
        let cli = Cli::try_parse_from(["playout", "clip.mp4", "9100"]).unwrap();
        assert_eq!(cli.media, "clip.mp4");

        let config = cli.player_config().unwrap();
        assert_eq!(config.control_port, 9100);
        assert!(config.audio_enabled);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"control_port": 7000, "initial_volume": 20}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "playout",
            "testsrc:",
            "--config",
            file.path().to_str().unwrap(),
            "--volume",
            "65",
            "--bind",
            "127.0.0.1",
            "--no-audio",
        ])
        .unwrap();
        let config = cli.player_config().unwrap();
        assert_eq!(config.control_port, 7000);
        assert_eq!(config.initial_volume, 65);
        assert_eq!(config.control_bind, "127.0.0.1");
        assert!(!config.audio_enabled);
    }

    #[test]
    fn test_volume_out_of_range() {
        assert!(Cli::try_parse_from(["playout", "clip.mp4", "--volume", "101"]).is_err());
    }

    #[test]
    fn test_usage_errors_go_to_stderr() {
        let missing = Cli::try_parse_from(["playout"]).unwrap_err();
        assert!(missing.use_stderr());

        let bad_port = Cli::try_parse_from(["playout", "clip.mp4", "notaport"]).unwrap_err();
        assert!(bad_port.use_stderr());

        for flag in ["--help", "--version"] {
            let info = Cli::try_parse_from(["playout", flag]).unwrap_err();
            assert!(!info.use_stderr(), "{flag} should print to stdout");
        }
    }

    #[test]
    fn test_missing_config_file() {
        let cli =
            Cli::try_parse_from(["playout", "clip.mp4", "--config", "/nonexistent/playout.json"])
                .unwrap();
        assert!(cli.player_config().is_err());
    }
}
