//! `playout <media> [port]`: loop a media file under remote control.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use playout_control::{AuthToken, CommandSink, ControlServer};
use playout_engine::{OutputFactory, Player, ShutdownSignal};
use playout_ipc::{PlaybackState, PlayerCommand, PlayerEvent};

use crate::cli::Cli;

const DEFAULT_LOG_FILTER: &str =
    "playout=info,playout_engine=info,playout_media=info,playout_audio=info,playout_control=info";

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "cpal")]
fn outputs() -> Box<dyn OutputFactory> {
    Box::new(devices::DeviceOutputs)
}

#[cfg(not(feature = "cpal"))]
fn outputs() -> Box<dyn OutputFactory> {
    Box::new(playout_engine::HeadlessOutputs)
}

#[cfg(feature = "cpal")]
mod devices {
    use playout_audio::{AudioOutput, CpalOutput};
    use playout_engine::{HeadlessDisplay, OutputFactory, PlayerResult, VideoOutput};
    use playout_ipc::PlayerConfig;
    use playout_media::VideoStreamInfo;

    /// Default sound device, frames counted without a window.
    pub struct DeviceOutputs;

    impl OutputFactory for DeviceOutputs {
        fn open_audio(&self, _config: &PlayerConfig) -> PlayerResult<Box<dyn AudioOutput>> {
            Ok(Box::new(CpalOutput::open_default()?))
        }

        fn open_display(&self, video: &VideoStreamInfo) -> PlayerResult<Box<dyn VideoOutput>> {
            Ok(Box::new(HeadlessDisplay::new(video.width, video.height)))
        }
    }
}

/// Trigger `signal` on Ctrl-C or SIGTERM.
fn watch_os_signals(signal: ShutdownSignal) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                let ctrl_c = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Ctrl-C handler unavailable: {}", e);
                        std::future::pending::<()>().await;
                    }
                };

                #[cfg(unix)]
                let term = async {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut sigterm) => {
                            sigterm.recv().await;
                        }
                        Err(e) => {
                            warn!("SIGTERM handler unavailable: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                };

                #[cfg(not(unix))]
                let term = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term => {},
                }
            });
            warn!("Shutdown signal received");
            signal.trigger();
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn log_events(events: Receiver<PlayerEvent>) -> Result<()> {
    thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    PlayerEvent::Ready => info!("Playback ready"),
                    PlayerEvent::StateChanged { previous, current } => {
                        info!(%previous, %current, "State changed")
                    }
                    PlayerEvent::Looped { iteration } => debug!(iteration, "Looped"),
                    PlayerEvent::CommandRejected { command, reason } => {
                        warn!(%command, %reason, "Command rejected")
                    }
                    PlayerEvent::Error {
                        recoverable,
                        message,
                    } => error!(recoverable, "{}", message),
                    PlayerEvent::Metrics(_) => {}
                    PlayerEvent::Shutdown => break,
                }
            }
        })
        .context("failed to spawn event thread")?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.player_config()?;

    let (event_tx, events) = playout_ipc::event_channel();
    log_events(events)?;

    let mut player = Player::new(cli.media.clone(), config.clone(), outputs(), event_tx);
    watch_os_signals(player.shutdown_signal())?;

    let token = AuthToken::generate();
    let controller = player.controller();
    let sink: Arc<dyn CommandSink> =
        Arc::new(move |command: PlayerCommand| -> Result<PlaybackState, String> {
            controller.handle(command).map_err(|e| e.to_string())
        });
    let mut server = ControlServer::start(&config.control_bind, config.control_port, token.clone(), sink)
        .context("failed to start control channel")?;
    info!(addr = %server.local_addr(), token = %token, "Remote control ready");

    player.initialize().context("failed to start player")?;
    player.run();

    if let Err(e) = server.stop() {
        debug!("Control channel already stopped: {}", e);
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version print to stdout and exit 0.
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
