//! Scripted control surface.
//!
//! Emits a fixed sequence of intents at given offsets from its creation and
//! records everything the control loop shows it. Offsets use
//! `tokio::time::Instant`, so scripts replay deterministically under a paused
//! test clock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{ControlSurface, Intent, Notice};
use crate::hardware::DeviceSnapshot;

#[derive(Debug, Default)]
struct LogState {
    snapshots: Vec<DeviceSnapshot>,
    notices: Vec<Notice>,
    suggested_setpoint: Option<f64>,
    emitted: Vec<(Duration, Intent)>,
}

/// Shared record of what a [`ScriptedSurface`] displayed.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    inner: Arc<Mutex<LogState>>,
}

impl SurfaceLog {
    /// Snapshots shown, oldest first.
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.inner.lock().snapshots.clone()
    }

    /// Notices received, oldest first.
    pub fn notices(&self) -> Vec<Notice> {
        self.inner.lock().notices.clone()
    }

    /// Set-point suggested at startup.
    pub fn suggested_setpoint(&self) -> Option<f64> {
        self.inner.lock().suggested_setpoint
    }

    /// Intents handed to the control loop with the offset they were polled at.
    pub fn emitted(&self) -> Vec<(Duration, Intent)> {
        self.inner.lock().emitted.clone()
    }

    /// Error notices only.
    pub fn errors(&self) -> Vec<String> {
        self.inner
            .lock()
            .notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Surface replaying a time-ordered intent script.
///
/// # Example
///
/// ```rust,ignore
/// let surface = ScriptedSurface::new()
///     .at(Duration::from_millis(500), Intent::Start(request))
///     .at(Duration::from_secs(8), Intent::WindowClosed);
/// let log = surface.log();
/// ControlLoop::new(supervisor, surface).run().await?;
/// assert!(log.errors().is_empty());
/// ```
#[derive(Debug)]
pub struct ScriptedSurface {
    origin: Instant,
    script: VecDeque<(Duration, Intent)>,
    log: SurfaceLog,
}

impl ScriptedSurface {
    /// Empty script starting now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            script: VecDeque::new(),
            log: SurfaceLog::default(),
        }
    }

    /// Emit `intent` once `offset` has elapsed. Steps with equal offsets keep
    /// their insertion order.
    pub fn at(mut self, offset: Duration, intent: Intent) -> Self {
        let position = self
            .script
            .iter()
            .position(|(at, _)| *at > offset)
            .unwrap_or(self.script.len());
        self.script.insert(position, (offset, intent));
        self
    }

    /// Handle to the display record.
    pub fn log(&self) -> SurfaceLog {
        self.log.clone()
    }

    /// Steps not yet emitted.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Default for ScriptedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface for ScriptedSurface {
    fn poll_intents(&mut self) -> Vec<Intent> {
        let now = self.origin.elapsed();
        let mut due = Vec::new();
        while self.script.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, intent)) = self.script.pop_front() {
                self.log.inner.lock().emitted.push((now, intent.clone()));
                due.push(intent);
            }
        }
        due
    }

    fn show_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        self.log.inner.lock().snapshots.push(*snapshot);
    }

    fn suggest_setpoint(&mut self, setpoint: f64) {
        self.log.inner.lock().suggested_setpoint = Some(setpoint);
    }

    fn notify(&mut self, notice: Notice) {
        self.log.inner.lock().notices.push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn intents_are_released_in_time_order() {
        let mut surface = ScriptedSurface::new()
            .at(Duration::from_millis(300), Intent::WindowClosed)
            .at(Duration::from_millis(100), Intent::Stop);

        assert!(surface.poll_intents().is_empty());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(surface.poll_intents(), vec![Intent::Stop]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(surface.poll_intents(), vec![Intent::WindowClosed]);
        assert_eq!(surface.remaining(), 0);
        assert_eq!(surface.log().emitted().len(), 2);
    }
}
