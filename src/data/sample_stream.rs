//! Timestamped multi-channel sample buffer for one run.
//!
//! The run loop appends samples at acquisition cadence; any number of
//! observers (the render pump, tests, the CLI summary) drain them at their own
//! cadence. Each observer keeps its own per-channel cursor, so draining never
//! removes data from the stream.
//!
//! # Lifecycle
//!
//! ```text
//! declare_channel()* ──seal()──▶ append()* ──close()──▶ (read-only)
//! ```
//!
//! - Channels can only be declared before `seal()`; acquisition seals the
//!   stream before the first sample.
//! - Appending to an undeclared channel is a programming error
//!   (`UnknownChannel`).
//! - Elapsed times are non-decreasing per channel (`OutOfOrderSample`).
//! - There is no eviction: a stream lives exactly as long as its run.
//!
//! # Example
//!
//! ```rust,ignore
//! let stream = SampleStream::new();
//! stream.declare_channel("velocity", LineStyle::Solid)?;
//! stream.seal();
//!
//! let mut observer = stream.observe();
//! stream.append("velocity", Duration::from_millis(10), 1.5)?;
//! assert_eq!(observer.drain().len(), 1);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{AppResult, TunerError};

/// How a renderer should draw a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStyle {
    /// Measured data
    Solid,
    /// Constant reference markers (limits)
    Dashed,
}

/// A declared channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel name used for appends
    pub name: String,
    /// Rendering style
    pub style: LineStyle,
}

/// One acquired value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Channel the value belongs to
    pub channel: Arc<str>,
    /// Time since acquisition start
    pub elapsed: Duration,
    /// Measured or commanded value
    pub value: f64,
}

#[derive(Debug)]
struct Series {
    name: Arc<str>,
    style: LineStyle,
    points: Vec<(Duration, f64)>,
}

#[derive(Debug, Default)]
struct StreamState {
    series: Vec<Series>,
    index: HashMap<String, usize>,
    sealed: bool,
    closed: bool,
    total: usize,
}

#[derive(Debug)]
struct StreamInner {
    state: RwLock<StreamState>,
    updates: watch::Sender<u64>,
}

/// Shared handle to one run's sample buffer.
#[derive(Debug, Clone)]
pub struct SampleStream {
    inner: Arc<StreamInner>,
}

impl SampleStream {
    /// Create an empty, unsealed stream.
    pub fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            inner: Arc::new(StreamInner {
                state: RwLock::new(StreamState::default()),
                updates,
            }),
        }
    }

    /// Declare a channel. Re-declaring an existing channel is a no-op.
    pub fn declare_channel(&self, name: impl Into<String>, style: LineStyle) -> AppResult<()> {
        let name = name.into();
        let mut state = self.inner.state.write();
        if state.index.contains_key(&name) {
            return Ok(());
        }
        if state.sealed {
            return Err(TunerError::ChannelsSealed(name));
        }
        let position = state.series.len();
        state.series.push(Series {
            name: Arc::from(name.as_str()),
            style,
            points: Vec::new(),
        });
        state.index.insert(name, position);
        Ok(())
    }

    /// Freeze the channel set; called when acquisition starts.
    pub fn seal(&self) {
        self.inner.state.write().sealed = true;
    }

    /// Append a value to a declared channel.
    pub fn append(&self, channel: &str, elapsed: Duration, value: f64) -> AppResult<()> {
        {
            let mut state = self.inner.state.write();
            let position = *state
                .index
                .get(channel)
                .ok_or_else(|| TunerError::UnknownChannel(channel.to_string()))?;
            let series = &mut state.series[position];
            if let Some(&(previous, _)) = series.points.last() {
                if elapsed < previous {
                    return Err(TunerError::OutOfOrderSample {
                        channel: channel.to_string(),
                        elapsed,
                        previous,
                    });
                }
            }
            series.points.push((elapsed, value));
            state.total += 1;
        }
        self.inner.updates.send_modify(|generation| *generation += 1);
        Ok(())
    }

    /// Mark the end of the run; observers finish after draining.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.write();
            state.sealed = true;
            state.closed = true;
        }
        self.inner.updates.send_modify(|generation| *generation += 1);
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.read().closed
    }

    /// Whether the channel set is frozen.
    pub fn is_sealed(&self) -> bool {
        self.inner.state.read().sealed
    }

    /// Declared channels, in declaration order.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.inner
            .state
            .read()
            .series
            .iter()
            .map(|series| ChannelSpec {
                name: series.name.to_string(),
                style: series.style,
            })
            .collect()
    }

    /// Copy of every sample of one channel.
    pub fn series(&self, channel: &str) -> AppResult<Vec<Sample>> {
        let state = self.inner.state.read();
        let position = *state
            .index
            .get(channel)
            .ok_or_else(|| TunerError::UnknownChannel(channel.to_string()))?;
        let series = &state.series[position];
        Ok(series
            .points
            .iter()
            .map(|&(elapsed, value)| Sample {
                channel: Arc::clone(&series.name),
                elapsed,
                value,
            })
            .collect())
    }

    /// Number of samples per channel, in declaration order.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.inner
            .state
            .read()
            .series
            .iter()
            .map(|series| (series.name.to_string(), series.points.len()))
            .collect()
    }

    /// Total number of samples across all channels.
    pub fn len(&self) -> usize {
        self.inner.state.read().total
    }

    /// Whether no sample has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create an observer starting at the beginning of every channel.
    pub fn observe(&self) -> StreamObserver {
        StreamObserver {
            stream: self.clone(),
            cursors: Vec::new(),
            updates: self.inner.updates.subscribe(),
        }
    }
}

impl Default for SampleStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Independent reader of a [`SampleStream`].
#[derive(Debug)]
pub struct StreamObserver {
    stream: SampleStream,
    cursors: Vec<usize>,
    updates: watch::Receiver<u64>,
}

impl StreamObserver {
    /// The observed stream.
    pub fn stream(&self) -> &SampleStream {
        &self.stream
    }

    /// Samples appended since the previous drain, grouped per channel in
    /// declaration order and ordered by elapsed time within a channel.
    pub fn drain(&mut self) -> Vec<Sample> {
        let state = self.stream.inner.state.read();
        self.cursors.resize(state.series.len(), 0);
        let mut drained = Vec::new();
        for (series, cursor) in state.series.iter().zip(self.cursors.iter_mut()) {
            drained.extend(series.points[*cursor..].iter().map(|&(elapsed, value)| Sample {
                channel: Arc::clone(&series.name),
                elapsed,
                value,
            }));
            *cursor = series.points.len();
        }
        self.updates.borrow_and_update();
        drained
    }

    /// Wait until new samples arrive or the stream is closed.
    pub async fn changed(&mut self) {
        // The sender lives inside the stream we hold, so this cannot fail.
        let _ = self.updates.changed().await;
    }

    /// Whether the stream is closed and everything has been drained.
    pub fn is_finished(&self) -> bool {
        let state = self.stream.inner.state.read();
        state.closed
            && state.series.len() == self.cursors.len()
            && state
                .series
                .iter()
                .zip(&self.cursors)
                .all(|(series, cursor)| series.points.len() == *cursor)
    }
}
