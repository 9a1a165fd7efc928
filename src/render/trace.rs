//! Renderer that reports telemetry through `tracing`.
//!
//! Used by the headless and console front ends. Every `show` logs the latest
//! value of channels that received new data (at `trace` level); `finish`
//! logs one summary line per channel.

use std::time::Duration;
use tracing::{info, trace};
use uuid::Uuid;

use super::{Renderer, RendererFactory};
use crate::data::{ChannelSpec, LineStyle, Sample};
use crate::experiment::RunRequest;

#[derive(Debug)]
struct ChannelStats {
    name: String,
    style: LineStyle,
    count: usize,
    min: f64,
    max: f64,
    last: Option<(Duration, f64)>,
    dirty: bool,
}

/// Per-channel summary logger.
#[derive(Debug)]
pub struct TraceRenderer {
    run_id: Uuid,
    channels: Vec<ChannelStats>,
    open: bool,
}

impl TraceRenderer {
    /// Renderer for the run `run_id`.
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            channels: Vec::new(),
            open: true,
        }
    }

    fn stats_mut(&mut self, channel: &str) -> Option<&mut ChannelStats> {
        self.channels.iter_mut().find(|stats| stats.name == channel)
    }
}

impl Renderer for TraceRenderer {
    fn declare_channel(&mut self, channel: &ChannelSpec) {
        self.channels.push(ChannelStats {
            name: channel.name.clone(),
            style: channel.style,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: None,
            dirty: false,
        });
    }

    fn append_sample(&mut self, sample: &Sample) {
        if let Some(stats) = self.stats_mut(&sample.channel) {
            stats.count += 1;
            stats.min = stats.min.min(sample.value);
            stats.max = stats.max.max(sample.value);
            stats.last = Some((sample.elapsed, sample.value));
            stats.dirty = true;
        }
    }

    fn show(&mut self) {
        for stats in self.channels.iter_mut().filter(|stats| stats.dirty) {
            stats.dirty = false;
            if let Some((elapsed, value)) = stats.last {
                trace!(run_id = %self.run_id, channel = %stats.name, ?elapsed, value, "sample");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn finish(&mut self) {
        for stats in &self.channels {
            match stats.last {
                Some((elapsed, last)) => info!(
                    run_id = %self.run_id,
                    channel = %stats.name,
                    marker = stats.style == LineStyle::Dashed,
                    samples = stats.count,
                    min = stats.min,
                    max = stats.max,
                    last,
                    ?elapsed,
                    "Channel summary"
                ),
                None => info!(run_id = %self.run_id, channel = %stats.name, "Channel had no samples"),
            }
        }
    }
}

/// Creates a [`TraceRenderer`] per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceFactory;

impl RendererFactory for TraceFactory {
    fn create(&self, run_id: Uuid, _request: &RunRequest) -> Box<dyn Renderer> {
        Box::new(TraceRenderer::new(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn sample(channel: &str, ms: u64, value: f64) -> Sample {
        Sample {
            channel: Arc::from(channel),
            elapsed: Duration::from_millis(ms),
            value,
        }
    }

    #[test]
    #[traced_test]
    fn finish_logs_channel_summary() {
        let mut renderer = TraceRenderer::new(Uuid::nil());
        renderer.declare_channel(&ChannelSpec {
            name: "velocity".into(),
            style: LineStyle::Solid,
        });
        renderer.declare_channel(&ChannelSpec {
            name: "torque".into(),
            style: LineStyle::Solid,
        });
        renderer.append_sample(&sample("velocity", 0, 1.0));
        renderer.append_sample(&sample("velocity", 10, 3.0));
        renderer.show();
        renderer.finish();

        assert!(logs_contain("Channel summary"));
        assert!(logs_contain("samples=2"));
        assert!(logs_contain("Channel had no samples"));
        assert!(renderer.is_open());

        renderer.close();
        assert!(!renderer.is_open());
    }

    #[test]
    fn samples_for_unknown_channels_are_ignored() {
        let mut renderer = TraceRenderer::new(Uuid::nil());
        renderer.append_sample(&sample("velocity", 0, 1.0));
        assert!(renderer.channels.is_empty());
    }
}
