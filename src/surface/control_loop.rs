//! Perpetual control-surface poll loop.
//!
//! Startup connects to the bus (no drive is fatal), shows the velocity-mode
//! registers and suggests an initial set-point. Afterwards, every poll
//! interval the loop lets the supervisor do its housekeeping and dispatches
//! the surface's intents. A failing intent is reported to the surface and
//! the loop keeps going; only `WindowClosed` ends it.
//!
//! While a save waits for the drive to restart the surface is still polled,
//! but only `WindowClosed` is honoured (it aborts the wait); every other
//! intent is discarded.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ControlSurface, Intent, Notice};
use crate::error::{AppResult, TunerError};
use crate::experiment::{RunRequest, StartOutcome, TaskSupervisor};
use crate::hardware::{ControlMode, Register};

enum Flow {
    Continue,
    Exit,
}

/// Drives a [`TaskSupervisor`] from a [`ControlSurface`].
pub struct ControlLoop<S> {
    supervisor: TaskSupervisor,
    surface: S,
    poll_interval: Duration,
    default_setpoint: f64,
}

impl<S: ControlSurface> ControlLoop<S> {
    /// Loop polling every 200ms with a default set-point of 50.
    pub fn new(supervisor: TaskSupervisor, surface: S) -> Self {
        Self {
            supervisor,
            surface,
            poll_interval: Duration::from_millis(200),
            default_setpoint: 50.0,
        }
    }

    /// Set the surface poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the preferred initial set-point.
    pub fn with_default_setpoint(mut self, setpoint: f64) -> Self {
        self.default_setpoint = setpoint;
        self
    }

    /// Run until the surface closes; returns the supervisor for inspection.
    ///
    /// Fails only when startup fails (no drive on the bus, unreadable
    /// registers).
    pub async fn run(mut self) -> AppResult<TaskSupervisor> {
        self.startup().await?;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.supervisor.tick().await {
                Ok(events) => {
                    if let Some(report) = events.finished {
                        self.surface.notify(Notice::RunFinished(report));
                    }
                    if let Some(snapshot) = events.snapshot {
                        self.surface.show_snapshot(&snapshot);
                    }
                }
                Err(err) => self.report(err),
            }

            for intent in self.surface.poll_intents() {
                match self.dispatch(intent).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => {
                        info!("Window closed; shutting down");
                        if let Err(err) = self.supervisor.shutdown().await {
                            warn!(error = %err, "Shutdown incomplete");
                        }
                        return Ok(self.supervisor);
                    }
                    Err(err) => self.report(err),
                }
            }
        }
    }

    async fn startup(&mut self) -> AppResult<()> {
        self.supervisor.connect().await?;
        let snapshot = self.supervisor.on_mode_changed(ControlMode::Velocity).await?;
        self.surface.show_snapshot(&snapshot);

        let position_out_max = self.supervisor.read_register(Register::PosPidOutMax).await?;
        self.surface
            .suggest_setpoint(self.default_setpoint.min(position_out_max));
        Ok(())
    }

    async fn dispatch(&mut self, intent: Intent) -> AppResult<Flow> {
        match intent {
            Intent::Start(request) => {
                let notice = match self.supervisor.request_start(request).await? {
                    StartOutcome::Started { run_id } => Notice::RunStarted(run_id),
                    StartOutcome::StoppedInPlace { run_id } => Notice::RunStoppedInPlace(run_id),
                };
                self.surface.notify(notice);
            }
            Intent::Stop => {
                self.supervisor.request_stop().await?;
                self.surface.notify(Notice::Stopped);
            }
            Intent::Save(request) => return self.save(request).await,
            Intent::ModeChanged(mode) => match self.supervisor.on_mode_changed(mode).await {
                Ok(snapshot) => self.surface.show_snapshot(&snapshot),
                Err(TunerError::SessionBusy) => self.surface.notify(Notice::RefreshDeferred(mode)),
                Err(err) => return Err(err),
            },
            Intent::WindowClosed => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    async fn save(&mut self, request: RunRequest) -> AppResult<Flow> {
        let device = self.supervisor.primary_device()?;
        let abort = CancellationToken::new();
        let mut closed = false;

        let result = {
            let save = self.supervisor.request_save(request, device, &abort);
            tokio::pin!(save);
            let mut ticker = interval(self.poll_interval);
            loop {
                tokio::select! {
                    result = &mut save => break result,
                    _ = ticker.tick() => {
                        for intent in self.surface.poll_intents() {
                            match intent {
                                Intent::WindowClosed => {
                                    closed = true;
                                    abort.cancel();
                                }
                                other => debug!(intent = ?other, "Intent discarded while resynchronizing"),
                            }
                        }
                    }
                }
            }
        };

        match result {
            Ok(snapshot) => {
                self.surface.show_snapshot(&snapshot);
                self.surface.notify(Notice::Saved(snapshot));
            }
            Err(TunerError::ResyncAborted) if closed => {}
            Err(err) if closed => self.report(err),
            Err(err) => return Err(err),
        }
        Ok(if closed { Flow::Exit } else { Flow::Continue })
    }

    fn report(&mut self, err: TunerError) {
        warn!(error = %err, recoverable = err.is_recoverable(), "Intent failed");
        self.surface.notify(Notice::Error(err.to_string()));
    }
}
