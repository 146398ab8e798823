//! Playback state machine driven by remote commands.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use playout_ipc::{PlaybackState, PlayerCommand, PlayerEvent, StopReason, Volume};
use playout_media::BoundedFrameQueue;

use crate::control::PlaybackFlags;
use crate::error::TransitionError;

struct ControllerState {
    state: PlaybackState,
    // Pause choice to apply once the outstanding seek is acknowledged.
    resume_paused: bool,
}

/// Owns the [`PlaybackState`] and turns commands into flag changes.
///
/// Every method is safe to call from any thread while the pipeline runs.
/// Handlers only flip flags and wake waiters; none of them waits on the
/// decoder or a consumer.
pub struct PlayerController {
    inner: Mutex<ControllerState>,
    flags: Arc<PlaybackFlags>,
    video_queue: Arc<BoundedFrameQueue>,
    audio_queue: Arc<BoundedFrameQueue>,
    event_tx: Sender<PlayerEvent>,
}

impl PlayerController {
    pub fn new(
        flags: Arc<PlaybackFlags>,
        video_queue: Arc<BoundedFrameQueue>,
        audio_queue: Arc<BoundedFrameQueue>,
        event_tx: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            inner: Mutex::new(ControllerState {
                state: PlaybackState::Initializing,
                resume_paused: false,
            }),
            flags,
            video_queue,
            audio_queue,
            event_tx,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn flags(&self) -> &Arc<PlaybackFlags> {
        &self.flags
    }

    /// Apply a command. A refusal is reported as a `CommandRejected` event.
    #[instrument(name = "controller_handle", skip(self))]
    pub fn handle(&self, command: PlayerCommand) -> Result<PlaybackState, TransitionError> {
        let result = match command {
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::Reset => self.reset(),
            PlayerCommand::SetVolume(volume) => self.set_volume(volume),
        };

        if let Err(e) = &result {
            debug!(command = command.name(), error = %e, "Command rejected");
            self.send_event(PlayerEvent::CommandRejected {
                command: command.name().to_string(),
                reason: e.to_string(),
            });
        }
        result
    }

    pub fn play(&self) -> Result<PlaybackState, TransitionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            PlaybackState::Playing => Ok(inner.state),
            PlaybackState::Paused => {
                self.flags.set_paused(false);
                self.transition(&mut inner, PlaybackState::Playing);
                Ok(inner.state)
            }
            PlaybackState::SeekPending => {
                inner.resume_paused = false;
                Ok(inner.state)
            }
            PlaybackState::Initializing => Err(TransitionError::NotStarted),
            state => Err(TransitionError::Terminal(state)),
        }
    }

    pub fn pause(&self) -> Result<PlaybackState, TransitionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            PlaybackState::Paused => Ok(inner.state),
            PlaybackState::Playing => {
                self.flags.set_paused(true);
                self.transition(&mut inner, PlaybackState::Paused);
                Ok(inner.state)
            }
            PlaybackState::SeekPending => {
                inner.resume_paused = true;
                Ok(inner.state)
            }
            PlaybackState::Initializing => Err(TransitionError::NotStarted),
            state => Err(TransitionError::Terminal(state)),
        }
    }

    /// Seek back to the start. Playback resumes once the decoder has flushed.
    pub fn reset(&self) -> Result<PlaybackState, TransitionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::SeekPending => {
                inner.resume_paused = false;
                // Interrupt before requesting; the decoder's seek flush clears it.
                self.video_queue.interrupt();
                self.audio_queue.interrupt();
                let generation = self.flags.request_seek(Duration::ZERO);
                debug!(generation, "Seek to start requested");

                if !inner.state.is_seek_pending() {
                    self.transition(&mut inner, PlaybackState::SeekPending);
                }
                Ok(inner.state)
            }
            PlaybackState::Initializing => Err(TransitionError::NotStarted),
            state => Err(TransitionError::Terminal(state)),
        }
    }

    pub fn stop(&self) -> Result<PlaybackState, TransitionError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(TransitionError::Terminal(state));
        }
        self.begin_shutdown(StopReason::RemoteCommand);
        Ok(self.state())
    }

    pub fn set_volume(&self, volume: Volume) -> Result<PlaybackState, TransitionError> {
        let inner = self.inner.lock();
        if inner.state.is_terminal() {
            return Err(TransitionError::Terminal(inner.state));
        }
        self.flags.volume().set(volume);
        info!(volume = volume.percent(), "Volume changed");
        Ok(inner.state)
    }

    /// Startup finished. Returns false if shutdown already began.
    pub fn mark_started(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != PlaybackState::Initializing {
            return false;
        }
        self.flags.set_paused(false);
        self.transition(&mut inner, PlaybackState::Playing);
        true
    }

    /// Complete an acknowledged seek. Called by the host loop every tick.
    pub fn refresh(&self) -> PlaybackState {
        let mut inner = self.inner.lock();
        if inner.state.is_seek_pending() && !self.flags.is_seek_pending() {
            let paused = inner.resume_paused;
            self.flags.set_paused(paused);
            let next = if paused {
                PlaybackState::Paused
            } else {
                PlaybackState::Playing
            };
            self.transition(&mut inner, next);
        }
        inner.state
    }

    /// Set the stop flag and wake every waiter. Returns false if already shutting down.
    #[instrument(name = "begin_shutdown", skip(self))]
    pub fn begin_shutdown(&self, reason: StopReason) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }

        info!(reason = %reason.message(), "Shutting down");
        self.flags.request_stop();
        self.video_queue.stop();
        self.audio_queue.stop();
        self.transition(&mut inner, PlaybackState::ShuttingDown);
        true
    }

    /// Enter the terminal state once every resource has been released.
    pub fn finish_shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.state != PlaybackState::Stopped {
            self.transition(&mut inner, PlaybackState::Stopped);
        }
    }

    fn transition(&self, inner: &mut ControllerState, next: PlaybackState) {
        let previous = inner.state;
        inner.state = next;

        debug!(
            previous = %previous,
            current = %next,
            "State transition"
        );

        self.send_event(PlayerEvent::StateChanged {
            previous,
            current: next,
        });
    }

    fn send_event(&self, event: PlayerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use playout_media::{
        AudioBuffer, Frame, FrameLedger, FramePayload, OverflowPolicy, PushOutcome, Rational,
        Timestamp,
    };
    use std::thread;

    struct Fixture {
        controller: Arc<PlayerController>,
        video: Arc<BoundedFrameQueue>,
        events: Receiver<PlayerEvent>,
    }

    fn fixture() -> Fixture {
        let (event_tx, events) = playout_ipc::event_channel();
        let video = Arc::new(BoundedFrameQueue::new("video", 2, OverflowPolicy::Block));
        let audio = Arc::new(BoundedFrameQueue::new("audio", 4, OverflowPolicy::DropOldest));
        let controller = Arc::new(PlayerController::new(
            Arc::new(PlaybackFlags::default()),
            Arc::clone(&video),
            audio,
            event_tx,
        ));
        Fixture {
            controller,
            video,
            events,
        }
    }

    fn started() -> Fixture {
        let fixture = fixture();
        assert!(fixture.controller.mark_started());
        fixture
    }

    fn drain(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        events.try_iter().collect()
    }

    fn frame(ledger: &Arc<FrameLedger>) -> Frame {
        Frame::tracked(
            Timestamp::new(0, Rational::new(1, 1000)),
            0,
            FramePayload::Audio(AudioBuffer {
                samples: vec![0.0; 4],
                sample_rate: 48_000,
                channels: 2,
            }),
            ledger,
        )
    }

    #[test]
    fn test_commands_rejected_while_initializing() {
        let f = fixture();
        assert_eq!(f.controller.play(), Err(TransitionError::NotStarted));
        assert_eq!(f.controller.pause(), Err(TransitionError::NotStarted));
        assert_eq!(f.controller.reset(), Err(TransitionError::NotStarted));
        assert_eq!(
            f.controller.set_volume(Volume::clamped(10)),
            Ok(PlaybackState::Initializing)
        );
    }

    #[test]
    fn test_pause_play_round_trip() {
        let f = started();
        drain(&f.events);

        assert_eq!(f.controller.pause(), Ok(PlaybackState::Paused));
        assert!(f.controller.flags().is_paused());
        assert_eq!(f.controller.pause(), Ok(PlaybackState::Paused));

        assert_eq!(f.controller.play(), Ok(PlaybackState::Playing));
        assert!(!f.controller.flags().is_paused());
        assert_eq!(f.controller.play(), Ok(PlaybackState::Playing));

        let transitions: Vec<_> = drain(&f.events)
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::StateChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![PlaybackState::Paused, PlaybackState::Playing]
        );
    }

    #[test]
    fn test_reset_completes_after_acknowledge() {
        let f = started();
        assert_eq!(f.controller.reset(), Ok(PlaybackState::SeekPending));
        assert_eq!(f.controller.refresh(), PlaybackState::SeekPending);

        let (generation, target) = f.controller.flags().pending_seek().unwrap();
        assert_eq!(target, Duration::ZERO);
        f.controller.flags().acknowledge_seek(generation);

        assert_eq!(f.controller.refresh(), PlaybackState::Playing);
    }

    #[test]
    fn test_reset_from_paused_resumes_playing() {
        let f = started();
        f.controller.pause().unwrap();
        f.controller.reset().unwrap();

        let (generation, _) = f.controller.flags().pending_seek().unwrap();
        f.controller.flags().acknowledge_seek(generation);

        assert_eq!(f.controller.refresh(), PlaybackState::Playing);
        assert!(!f.controller.flags().is_paused());
    }

    #[test]
    fn test_pause_during_seek_applies_after() {
        let f = started();
        f.controller.reset().unwrap();
        assert_eq!(f.controller.pause(), Ok(PlaybackState::SeekPending));

        let (generation, _) = f.controller.flags().pending_seek().unwrap();
        f.controller.flags().acknowledge_seek(generation);

        assert_eq!(f.controller.refresh(), PlaybackState::Paused);
        assert!(f.controller.flags().is_paused());
    }

    #[test]
    fn test_reset_releases_blocked_pusher() {
        let f = started();
        let ledger = FrameLedger::new();
        f.video.push(frame(&ledger));
        f.video.push(frame(&ledger));

        let pusher = {
            let video = Arc::clone(&f.video);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || video.push(frame(&ledger)))
        };

        thread::sleep(Duration::from_millis(30));
        f.controller.reset().unwrap();

        assert_eq!(pusher.join().unwrap(), PushOutcome::Interrupted);
        assert_eq!(f.video.len(), 2);
    }

    #[test]
    fn test_stop_is_terminal() {
        let f = started();
        assert_eq!(f.controller.stop(), Ok(PlaybackState::ShuttingDown));
        assert!(f.controller.flags().is_stopped());
        assert!(f.video.is_stopped());

        assert_eq!(
            f.controller.play(),
            Err(TransitionError::Terminal(PlaybackState::ShuttingDown))
        );
        assert!(matches!(
            f.controller.stop(),
            Err(TransitionError::Terminal(_))
        ));
        assert!(!f.controller.begin_shutdown(StopReason::Signal));

        f.controller.finish_shutdown();
        assert_eq!(f.controller.state(), PlaybackState::Stopped);
        assert_eq!(
            f.controller.set_volume(Volume::MAX),
            Err(TransitionError::Terminal(PlaybackState::Stopped))
        );
    }

    #[test]
    fn test_rejection_emits_event() {
        let f = fixture();
        drain(&f.events);
        assert!(f.controller.handle(PlayerCommand::Play).is_err());

        let events = drain(&f.events);
        assert!(matches!(
            events.as_slice(),
            [PlayerEvent::CommandRejected { command, .. }] if command == "play"
        ));
    }

    #[test]
    fn test_volume_clamped_and_applied() {
        let f = started();
        let volume = Volume::clamped(150);
        f.controller
            .handle(PlayerCommand::SetVolume(volume))
            .unwrap();
        assert_eq!(f.controller.flags().volume().get().percent(), 100);

        f.controller
            .handle(PlayerCommand::SetVolume(Volume::clamped(-5)))
            .unwrap();
        assert_eq!(f.controller.flags().volume().get().percent(), 0);
    }

    #[test]
    fn test_concurrent_commands_settle() {
        let f = started();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let controller = Arc::clone(&f.controller);
                thread::spawn(move || {
                    for n in 0..200 {
                        let command = match (i + n) % 3 {
                            0 => PlayerCommand::Play,
                            1 => PlayerCommand::Pause,
                            _ => PlayerCommand::SetVolume(Volume::clamped(n)),
                        };
                        let _ = controller.handle(command);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = f.controller.state();
        assert!(state.is_playing() || state.is_paused());
        assert_eq!(state.is_paused(), f.controller.flags().is_paused());
    }
}
