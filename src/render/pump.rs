//! Render pump: moves samples from a run's stream into its renderer.
//!
//! ```text
//! declare channels ──▶ [drain + show]* ──stream closed──▶ finish ──▶ hold while open
//!                                                                      │
//!                                  release() at any point ─────────────┴──▶ close
//! ```
//!
//! The pump never blocks the run loop: acquisition appends to the stream and
//! the pump catches up at its own cadence.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Renderer;
use crate::data::{Sample, SampleStream};

/// Handle to a running pump task.
pub struct RenderPump {
    release: CancellationToken,
    task: JoinHandle<()>,
}

impl RenderPump {
    /// Spawn a pump feeding `renderer` from `stream` every `period`.
    pub fn spawn(renderer: Box<dyn Renderer>, stream: SampleStream, period: Duration) -> Self {
        let release = CancellationToken::new();
        let task = tokio::spawn(pump(renderer, stream, period, release.clone()));
        Self { release, task }
    }

    /// Whether the pump has stopped on its own (renderer closed by the user).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the renderer and wait for the pump to stop.
    pub async fn release(self) {
        self.release.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "Render pump terminated abnormally");
        }
    }
}

fn forward(renderer: &mut dyn Renderer, samples: Vec<Sample>) {
    for sample in &samples {
        renderer.append_sample(sample);
    }
}

async fn pump(
    mut renderer: Box<dyn Renderer>,
    stream: SampleStream,
    period: Duration,
    release: CancellationToken,
) {
    let mut observer = stream.observe();
    for channel in stream.channels() {
        renderer.declare_channel(&channel);
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = release.cancelled() => {
                renderer.close();
                return;
            }
            _ = ticker.tick() => {}
        }
        if !renderer.is_open() {
            debug!("Renderer closed before end of run");
            return;
        }
        // Read the flag first so the drain below is the final one.
        let closed = stream.is_closed();
        forward(renderer.as_mut(), observer.drain());
        renderer.show();
        if closed {
            break;
        }
    }

    renderer.finish();
    while renderer.is_open() {
        tokio::select! {
            biased;
            _ = release.cancelled() => break,
            _ = ticker.tick() => renderer.show(),
        }
    }
    renderer.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LineStyle;
    use crate::render::RecordingRenderer;

    fn stream() -> SampleStream {
        let stream = SampleStream::new();
        stream.declare_channel("velocity", LineStyle::Solid).unwrap();
        stream.declare_channel("max-torque", LineStyle::Dashed).unwrap();
        stream.seal();
        stream
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_everything_then_finishes() {
        let stream = stream();
        let recording = RecordingRenderer::new();
        let pump = RenderPump::spawn(
            Box::new(recording.clone()),
            stream.clone(),
            Duration::from_millis(50),
        );

        for i in 0..20u64 {
            stream
                .append("velocity", Duration::from_millis(i * 10), i as f64)
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stream.close();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(recording.channels().len(), 2);
        assert_eq!(recording.channels()[1].style, LineStyle::Dashed);
        assert_eq!(recording.samples("velocity").len(), 20);
        assert!(recording.is_finished());
        assert!(!recording.is_closed(), "renderer stays open until released");

        pump.release().await;
        assert!(recording.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn release_mid_run_closes_renderer() {
        let stream = stream();
        let recording = RecordingRenderer::new();
        let pump = RenderPump::spawn(
            Box::new(recording.clone()),
            stream.clone(),
            Duration::from_millis(50),
        );
        stream.append("velocity", Duration::ZERO, 1.0).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        pump.release().await;
        assert!(recording.is_closed());
        assert!(!recording.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn user_closed_renderer_stops_pump() {
        let stream = stream();
        let recording = RecordingRenderer::new();
        let pump = RenderPump::spawn(
            Box::new(recording.clone()),
            stream.clone(),
            Duration::from_millis(50),
        );
        recording.close_window();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pump.is_finished());
    }
}
