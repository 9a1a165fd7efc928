//! Renderer that records every call, for tests and headless inspection.

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use super::{Renderer, RendererFactory};
use crate::data::{ChannelSpec, Sample};
use crate::experiment::RunRequest;

#[derive(Debug, Default)]
struct Recording {
    channels: Vec<ChannelSpec>,
    samples: Vec<Sample>,
    shows: usize,
    finished: bool,
    closed: bool,
}

/// Recording renderer; clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    state: Arc<Mutex<Recording>>,
}

impl RecordingRenderer {
    /// Empty, open recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared channels, in declaration order.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.state.lock().channels.clone()
    }

    /// Samples received for `channel`, in arrival order.
    pub fn samples(&self, channel: &str) -> Vec<Sample> {
        self.state
            .lock()
            .samples
            .iter()
            .filter(|sample| &*sample.channel == channel)
            .cloned()
            .collect()
    }

    /// Total samples received.
    pub fn sample_count(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Number of `show` calls.
    pub fn show_count(&self) -> usize {
        self.state.lock().shows
    }

    /// Whether `finish` was called.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Whether the renderer was closed (by the pump or the user).
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Simulate the user closing the display.
    pub fn close_window(&self) {
        self.state.lock().closed = true;
    }
}

impl Renderer for RecordingRenderer {
    fn declare_channel(&mut self, channel: &ChannelSpec) {
        self.state.lock().channels.push(channel.clone());
    }

    fn append_sample(&mut self, sample: &Sample) {
        self.state.lock().samples.push(sample.clone());
    }

    fn show(&mut self) {
        self.state.lock().shows += 1;
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }

    fn finish(&mut self) {
        self.state.lock().finished = true;
    }
}

/// Factory handing out recording renderers and keeping them for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    created: Arc<Mutex<Vec<(Uuid, RecordingRenderer)>>>,
}

impl RecordingFactory {
    /// Factory with no renderers yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every renderer created so far, oldest first.
    pub fn renderers(&self) -> Vec<RecordingRenderer> {
        self.created
            .lock()
            .iter()
            .map(|(_, renderer)| renderer.clone())
            .collect()
    }

    /// Renderer created for `run_id`.
    pub fn for_run(&self, run_id: Uuid) -> Option<RecordingRenderer> {
        self.created
            .lock()
            .iter()
            .find(|(id, _)| *id == run_id)
            .map(|(_, renderer)| renderer.clone())
    }
}

impl RendererFactory for RecordingFactory {
    fn create(&self, run_id: Uuid, _request: &RunRequest) -> Box<dyn Renderer> {
        let renderer = RecordingRenderer::new();
        self.created.lock().push((run_id, renderer.clone()));
        Box::new(renderer)
    }
}
