//! Telemetry renderers.
//!
//! A [`Renderer`] displays the samples of one run. It owns no control logic
//! and never talks to the drive; the [`RenderPump`] feeds it from the run's
//! sample stream at display cadence and releases it when the run is replaced,
//! stopped or the tool shuts down.
//!
//! - `pump`: per-run task draining a sample stream into a renderer
//! - `trace`: renderer emitting per-channel summaries through `tracing`
//! - `recording`: renderer recording every call, for tests

pub mod pump;
pub mod recording;
pub mod trace;

use uuid::Uuid;

use crate::data::{ChannelSpec, Sample};
use crate::experiment::RunRequest;

pub use pump::RenderPump;
pub use recording::{RecordingFactory, RecordingRenderer};
pub use trace::{TraceFactory, TraceRenderer};

/// Display sink for one run's telemetry.
///
/// # Contract
/// - `declare_channel` is called for every channel before its first sample
/// - `show` must not block; it is called at display cadence
/// - `finish` marks the end of data; the renderer may keep displaying
/// - `close` releases display resources; `is_open` is false afterwards
pub trait Renderer: Send {
    /// Register a channel and its line style.
    fn declare_channel(&mut self, channel: &ChannelSpec);

    /// Add one sample.
    fn append_sample(&mut self, sample: &Sample);

    /// Refresh the display.
    fn show(&mut self);

    /// Whether the display is still open.
    fn is_open(&self) -> bool;

    /// Release display resources.
    fn close(&mut self);

    /// No more samples will arrive for this run.
    fn finish(&mut self) {}
}

/// Creates one renderer per run.
pub trait RendererFactory: Send + Sync {
    /// Renderer for a run that is about to start.
    fn create(&self, run_id: Uuid, request: &RunRequest) -> Box<dyn Renderer>;
}
