//! Task supervisor: owns the single in-flight run.
//!
//! The supervisor is the only component that spawns or cancels run loops.
//! It keeps at most one non-terminal [`RunHandle`] and resolves every
//! start/stop/save request against it:
//!
//! | Current run        | `request_start`                 | `request_stop`                 |
//! |--------------------|---------------------------------|--------------------------------|
//! | none / terminal    | spawn a new run                 | disable drives, close link     |
//! | active             | cancel it, spawn nothing        | cancel it (run disables)       |
//!
//! A configuration save stops any run, writes the mode's registers, persists
//! them (which restarts the drive) and then waits for the drive to come back
//! on the bus before returning a fresh [`DeviceSnapshot`].

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::request::RunRequest;
use super::run_loop::{RunLoop, RunTiming};
use super::state::{RunPhase, RunReport, StartOutcome};
use crate::data::SampleStream;
use crate::error::{AppResult, TunerError};
use crate::hardware::{
    ActuatorControl, BusDiscovery, BusLink, ControlMode, DeviceId, DeviceSession, DeviceSnapshot,
    Register, RegisterAccess, SessionCell,
};
use crate::render::{RenderPump, RendererFactory};

/// How the supervisor waits for a drive restarted by a configuration save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncPolicy {
    /// Wait between enumeration attempts
    pub poll_interval: Duration,
    /// Give up after this many empty enumerations; `None` waits forever
    pub max_attempts: Option<u32>,
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Supervisor's record of the current (or most recent) run.
struct RunHandle {
    id: Uuid,
    request: RunRequest,
    cancel: CancellationToken,
    phase: watch::Receiver<RunPhase>,
    stream: SampleStream,
    task: Option<JoinHandle<RunReport>>,
    render: Option<RenderPump>,
}

impl RunHandle {
    fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Wait for the run task and collect its report (once).
    async fn join(&mut self) -> AppResult<Option<RunReport>> {
        match self.task.take() {
            Some(task) => task
                .await
                .map(Some)
                .map_err(|e| TunerError::TaskJoin(e.to_string())),
            None => Ok(None),
        }
    }

    async fn release_renderer(&mut self) {
        if let Some(render) = self.render.take() {
            render.release().await;
        }
    }
}

/// Public view of the current run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// Run identifier
    pub id: Uuid,
    /// Latest published phase
    pub phase: RunPhase,
    /// Request the run was started with
    pub request: RunRequest,
    /// The run's sample stream
    pub stream: SampleStream,
}

/// What happened during a [`TaskSupervisor::tick`].
#[derive(Debug, Default)]
pub struct TickEvents {
    /// Report of a run that reached a terminal state since the last tick
    pub finished: Option<RunReport>,
    /// Snapshot refreshed because a mode change was deferred by a busy session
    pub snapshot: Option<DeviceSnapshot>,
}

/// Coordinates run start/replace/cancel and post-save resynchronization.
pub struct TaskSupervisor {
    session: SessionCell,
    timing: RunTiming,
    resync: ResyncPolicy,
    display_period: Duration,
    renderers: Option<Arc<dyn RendererFactory>>,
    devices: Vec<DeviceId>,
    current: Option<RunHandle>,
    snapshot: Option<DeviceSnapshot>,
    pending_mode: Option<ControlMode>,
    last_report: Option<RunReport>,
    /// Collected but not yet handed out by `tick`
    undelivered: Option<RunReport>,
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("timing", &self.timing)
            .field("resync", &self.resync)
            .field("display_period", &self.display_period)
            .field("devices", &self.devices)
            .field("snapshot", &self.snapshot)
            .field("pending_mode", &self.pending_mode)
            .field("last_report", &self.last_report)
            .field("undelivered", &self.undelivered)
            .finish_non_exhaustive()
    }
}

impl TaskSupervisor {
    /// Supervisor over `session` with default timing and no renderer.
    pub fn new(session: SessionCell) -> Self {
        Self {
            session,
            timing: RunTiming::default(),
            resync: ResyncPolicy::default(),
            display_period: Duration::from_millis(50),
            renderers: None,
            devices: Vec::new(),
            current: None,
            snapshot: None,
            pending_mode: None,
            last_report: None,
            undelivered: None,
        }
    }

    /// Set run loop timing.
    pub fn with_timing(mut self, timing: RunTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Set the post-save resynchronization policy.
    pub fn with_resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    /// Attach a renderer to every run, refreshed every `display_period`.
    pub fn with_renderers(
        mut self,
        factory: Arc<dyn RendererFactory>,
        display_period: Duration,
    ) -> Self {
        self.renderers = Some(factory);
        self.display_period = display_period;
        self
    }

    /// Enumerate the bus and connect every drive found.
    ///
    /// The first drive becomes the primary one (the one runs and saves use).
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> AppResult<Vec<DeviceId>> {
        let lease = self.session.lease().await;
        let found = lease.enumerate().await.context("enumerating bus")?;
        if found.is_empty() {
            return Err(TunerError::DeviceUnreachable(
                "no actuator answered on the bus".into(),
            ));
        }
        for id in &found {
            lease.connect(*id).await?;
        }
        info!(devices = ?found, "Connected to actuators");
        self.devices = found.clone();
        Ok(found)
    }

    /// Start a run, or stop the active one in place.
    ///
    /// If a run is active it is cancelled and no new run is spawned, whatever
    /// `request` holds. Otherwise `request` is validated and a new run with
    /// exactly it is spawned, replacing (and releasing the renderer of) any
    /// terminal run.
    #[instrument(skip(self, request), fields(mode = %request.mode(), setpoint = request.setpoint()))]
    pub async fn request_start(&mut self, request: RunRequest) -> AppResult<StartOutcome> {
        if let Some(handle) = &self.current {
            if handle.phase().is_active() {
                let run_id = handle.id;
                info!(run_id = %run_id, "Run still active; stopping it in place");
                self.halt().await?;
                self.release_renderer().await;
                return Ok(StartOutcome::StoppedInPlace { run_id });
            }
        }

        // Only a spawn uses the request; a stop in place ignores it.
        request.validate()?;

        let device = self.primary_device()?;
        let lease = self.session.lease().await;
        let present = lease.enumerate().await.context("enumerating bus")?;
        if !present.contains(&device) {
            return Err(TunerError::DeviceUnreachable(format!(
                "{} did not answer on the bus",
                device
            )));
        }

        self.retire_current().await?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let run = RunLoop::new(
            run_id,
            request.clone(),
            device,
            lease,
            self.timing,
            cancel.clone(),
        )?;
        let stream = run.stream();
        let phase = run.phase();
        let render = self.renderers.as_ref().map(|factory| {
            RenderPump::spawn(
                factory.create(run_id, &request),
                stream.clone(),
                self.display_period,
            )
        });
        let task = tokio::spawn(run.run().instrument(info_span!("run", run_id = %run_id)));

        info!(run_id = %run_id, device = %device, "Run spawned");
        self.current = Some(RunHandle {
            id: run_id,
            request,
            cancel,
            phase,
            stream,
            task: Some(task),
            render,
        });
        Ok(StartOutcome::Started { run_id })
    }

    /// Stop the current run, if any, and make sure the drives are disabled.
    ///
    /// With a run in flight the run's own cleanup disables its drive; without
    /// one the supervisor disables every drive and closes the link. Returns
    /// once any run is terminal. Calling it repeatedly is harmless.
    #[instrument(skip(self))]
    pub async fn request_stop(&mut self) -> AppResult<()> {
        if self.halt().await?.is_none() {
            self.disable_devices(None).await?;
        }
        self.release_renderer().await;
        Ok(())
    }

    /// Write `request`'s gains/limits to `device`, persist them and wait for
    /// the drive to come back.
    ///
    /// The wait polls enumeration every `poll_interval` until a drive answers,
    /// reconnects every drive found and refreshes the snapshot. Only `abort`
    /// ends the wait early ([`TunerError::ResyncAborted`]); with a bounded
    /// policy running out of attempts yields [`TunerError::DeviceUnreachable`].
    #[instrument(skip(self, request, abort), fields(mode = %request.mode(), device = %device))]
    pub async fn request_save(
        &mut self,
        request: RunRequest,
        device: DeviceId,
        abort: &CancellationToken,
    ) -> AppResult<DeviceSnapshot> {
        request.validate()?;
        self.request_stop().await?;

        let lease = self.session.lease().await;
        for (register, value) in request.save_registers() {
            lease
                .write_register(device, register, value)
                .await
                .with_context(|| format!("writing {}", register))?;
            debug!(register = %register, value, "Register written");
        }
        lease
            .persist_config(device)
            .await
            .context("persisting configuration")?;
        info!("Configuration saved; waiting for the drive to restart");
        self.devices.clear();
        self.snapshot = None;

        let mut attempts: u32 = 0;
        let found = loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    warn!(attempts, "Resynchronization aborted");
                    return Err(TunerError::ResyncAborted);
                }
                _ = sleep(self.resync.poll_interval) => {}
            }
            attempts += 1;
            match lease.enumerate().await {
                Ok(found) if !found.is_empty() => break found,
                Ok(_) => debug!(attempts, "Drive not back yet"),
                Err(err) => warn!(attempts, error = %err, "Enumeration failed during resync"),
            }
            if let Some(max) = self.resync.max_attempts {
                if attempts >= max {
                    return Err(TunerError::DeviceUnreachable(format!(
                        "{} did not come back after {} enumerations",
                        device, attempts
                    )));
                }
            }
        };

        for id in &found {
            lease.connect(*id).await?;
        }
        let primary = if found.contains(&device) {
            device
        } else {
            found[0]
        };
        self.devices = found;
        let snapshot = read_snapshot(&*lease, primary, request.mode()).await?;
        info!(attempts, devices = ?self.devices, "Drive resynchronized");
        self.snapshot = Some(snapshot);
        Ok(snapshot)
    }

    /// Read the registers relevant to `mode` for display.
    ///
    /// Never touches an in-flight run. While a run holds the session this
    /// returns [`TunerError::SessionBusy`] and the refresh is delivered by a
    /// later [`tick`](Self::tick).
    #[instrument(skip(self))]
    pub async fn on_mode_changed(&mut self, mode: ControlMode) -> AppResult<DeviceSnapshot> {
        let device = self.primary_device()?;
        let Some(lease) = self.session.try_lease() else {
            debug!("Session busy; deferring snapshot refresh");
            self.pending_mode = Some(mode);
            return Err(TunerError::SessionBusy);
        };
        let snapshot = read_snapshot(&*lease, device, mode).await?;
        self.pending_mode = None;
        self.snapshot = Some(snapshot);
        Ok(snapshot)
    }

    /// Read one register of the primary drive.
    pub async fn read_register(&mut self, register: Register) -> AppResult<f64> {
        let device = self.primary_device()?;
        let lease = self.session.try_lease().ok_or(TunerError::SessionBusy)?;
        Ok(lease
            .read_register(device, register)
            .await
            .with_context(|| format!("reading {}", register))?)
    }

    /// Periodic housekeeping: collect finished runs and apply a deferred
    /// snapshot refresh once the session is free.
    pub async fn tick(&mut self) -> AppResult<TickEvents> {
        let mut events = TickEvents::default();

        // A report collected by stop/start/save goes out before a newer one is reaped.
        if self.undelivered.is_none() {
            if let Some(handle) = self.current.as_mut() {
                let finished = handle.task.as_ref().is_some_and(|task| task.is_finished());
                if finished {
                    if let Some(report) = handle.join().await? {
                        self.collected(report);
                    }
                }
            }
        }
        events.finished = self.undelivered.take();

        if let Some(mode) = self.pending_mode {
            match self.on_mode_changed(mode).await {
                Ok(snapshot) => events.snapshot = Some(snapshot),
                Err(TunerError::SessionBusy) => {}
                Err(err) => {
                    self.pending_mode = None;
                    return Err(err);
                }
            }
        }

        Ok(events)
    }

    /// Stop everything before exit: cancel the run, disable every drive,
    /// close the link and release the renderer.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let stopped = self.halt().await?;
        self.disable_devices(stopped).await?;
        self.release_renderer().await;
        info!("Supervisor shut down");
        Ok(())
    }

    /// Current (or most recent) run.
    pub fn current_run(&self) -> Option<RunInfo> {
        self.current.as_ref().map(|handle| RunInfo {
            id: handle.id,
            phase: handle.phase(),
            request: handle.request.clone(),
            stream: handle.stream.clone(),
        })
    }

    /// Report of the most recently collected run.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Last snapshot read from the drive.
    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.snapshot
    }

    /// Connected drives; the first one is the primary.
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// The drive runs and saves act on.
    pub fn primary_device(&self) -> AppResult<DeviceId> {
        self.devices.first().copied().ok_or_else(|| {
            TunerError::DeviceUnreachable("no actuator connected".into())
        })
    }

    /// Cancel the active run and wait for it to become terminal.
    ///
    /// Returns the drive the run disabled, `None` if no run was in flight.
    /// Cancelling a terminal run is absorbed as a no-op.
    async fn halt(&mut self) -> AppResult<Option<DeviceId>> {
        let Some(handle) = self.current.as_mut() else {
            return Ok(None);
        };
        let was_active = handle.phase().is_active();
        if was_active {
            handle.cancel.cancel();
        }
        let report = handle.join().await?;
        let (run_id, phase) = (handle.id, handle.phase());
        if let Some(report) = report {
            self.collected(report);
        }
        if !was_active {
            return Ok(None);
        }
        info!(run_id = %run_id, phase = %phase, "Run stopped");
        // The run only ever drives the primary drive.
        Ok(self.devices.first().copied())
    }

    /// Collect and forget a terminal run before a new one replaces it.
    async fn retire_current(&mut self) -> AppResult<()> {
        if let Some(mut handle) = self.current.take() {
            if let Some(report) = handle.join().await? {
                self.collected(report);
            }
            handle.release_renderer().await;
            debug!(run_id = %handle.id, "Previous run replaced");
        }
        Ok(())
    }

    fn collected(&mut self, report: RunReport) {
        info!(run_id = %report.run_id, outcome = ?report.outcome, "Run collected");
        self.last_report = Some(report.clone());
        self.undelivered = Some(report);
    }

    async fn release_renderer(&mut self) {
        if let Some(handle) = self.current.as_mut() {
            handle.release_renderer().await;
        }
    }

    /// Disable every connected drive except `skip` and close the link.
    async fn disable_devices(&mut self, skip: Option<DeviceId>) -> AppResult<()> {
        let lease = self.session.lease().await;
        for id in self.devices.iter().filter(|id| Some(**id) != skip) {
            if let Err(err) = lease.enable(*id, false).await {
                warn!(device = %id, error = %err, "Failed to disable drive");
            }
        }
        lease.end().await.context("closing link")?;
        Ok(())
    }
}

/// Read the registers shown for `mode`.
async fn read_snapshot(
    session: &dyn DeviceSession,
    device: DeviceId,
    mode: ControlMode,
) -> AppResult<DeviceSnapshot> {
    let registers = DeviceSnapshot::registers(mode);
    let mut values = [0.0; 6];
    for (slot, register) in values.iter_mut().zip(registers) {
        *slot = session
            .read_register(device, register)
            .await
            .with_context(|| format!("reading {}", register))?;
    }
    Ok(DeviceSnapshot::from_values(mode, values))
}
