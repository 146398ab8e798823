//! Decode, synchronize and present pipeline for the looping player.
//!
//! A decoder thread fills bounded video and audio queues. The presenter,
//! driven by the host loop, and the audio sink, driven by the device
//! callback, drain them against a shared [`SyncClock`]. The
//! [`PlayerController`] turns commands into flag changes the workers
//! observe at loop boundaries.

mod audio_sink;
mod clock;
mod control;
mod controller;
mod decoder;
mod display;
mod error;
mod metrics;
mod orchestrator;
mod outputs;
mod presenter;
mod shutdown;
mod state;

pub use audio_sink::AudioSink;
pub use clock::{ClockSettings, MasterSource, SyncClock, SyncDecision};
pub use control::PlaybackFlags;
pub use controller::PlayerController;
pub use decoder::{Decoder, DecoderContext};
pub use display::{HeadlessDisplay, VideoOutput};
pub use error::{PlayerError, TransitionError};
pub use metrics::{log_metrics, MetricsCollector};
pub use orchestrator::Player;
pub use outputs::{HeadlessOutputs, OutputFactory};
pub use presenter::{Presenter, PresenterTiming, TickOutcome};
pub use shutdown::ShutdownSignal;
pub use state::{InitializedResources, PipelineShared, ResourceManager};

/// Result type for player operations.
pub type PlayerResult<T> = Result<T, PlayerError>;
