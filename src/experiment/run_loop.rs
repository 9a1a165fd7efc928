//! Step-response run loop.
//!
//! One `RunLoop` drives one test: it configures the drive, samples the
//! requested channels at a fixed period for the requested duration while
//! applying a set-point step, then lets the motor settle and releases the
//! drive.
//!
//! The loop owns a [`SessionLease`] for its whole lifetime, so nothing else
//! can talk to the drive until the run is terminal. Cancellation is
//! cooperative: the token is checked at every tick boundary, and a cancelled
//! run skips the settle grace and disables the drive immediately.
//!
//! Whatever way the run ends, the drive is disabled exactly once, the link is
//! closed, the sample stream is closed and the terminal phase is published.

use anyhow::Context;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::request::{Channel, RunRequest};
use super::state::{ChannelCount, RunOutcome, RunPhase, RunReport};
use crate::data::SampleStream;
use crate::error::AppResult;
use crate::hardware::{
    ActuatorControl, BusLink, ControlMode, DeviceId, Feedback, SessionLease,
};

/// Fraction of the test window after which the set-point step is applied.
pub const RAMP_FRACTION: f64 = 0.1;

/// Timing of a run; configuration-level, never part of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTiming {
    /// Sampling period inside the test window
    pub acquisition_period: Duration,
    /// Wait between the end of the window and torque disable
    pub settle_grace: Duration,
}

impl Default for RunTiming {
    fn default() -> Self {
        Self {
            acquisition_period: Duration::from_millis(10),
            settle_grace: Duration::from_secs(1),
        }
    }
}

/// Whether the set-point step has been applied at `elapsed`.
pub fn step_applied(elapsed: Duration, duration: Duration) -> bool {
    elapsed.as_secs_f64() > RAMP_FRACTION * duration.as_secs_f64()
}

/// Effective set-point at `elapsed`: zero up to and including
/// `RAMP_FRACTION * duration`, `setpoint` afterwards.
pub fn setpoint_stage(elapsed: Duration, duration: Duration, setpoint: f64) -> f64 {
    if step_applied(elapsed, duration) {
        setpoint
    } else {
        0.0
    }
}

enum Finish {
    Completed,
    Cancelled,
}

/// One bounded acquisition/control task.
pub struct RunLoop {
    run_id: Uuid,
    request: RunRequest,
    device: DeviceId,
    session: SessionLease,
    timing: RunTiming,
    cancel: CancellationToken,
    stream: SampleStream,
    phase: watch::Sender<RunPhase>,
    ticks: u64,
    disabled: bool,
    link_open: bool,
}

impl RunLoop {
    /// Prepare a run; the sample stream is created with exactly the
    /// requested channels declared.
    pub fn new(
        run_id: Uuid,
        request: RunRequest,
        device: DeviceId,
        session: SessionLease,
        timing: RunTiming,
        cancel: CancellationToken,
    ) -> AppResult<Self> {
        let stream = SampleStream::new();
        for channel in request.channels() {
            stream.declare_channel(channel.name(), channel.style())?;
        }
        let (phase, _) = watch::channel(RunPhase::Configuring);
        Ok(Self {
            run_id,
            request,
            device,
            session,
            timing,
            cancel,
            stream,
            phase,
            ticks: 0,
            disabled: false,
            link_open: false,
        })
    }

    /// Run identifier.
    pub fn id(&self) -> Uuid {
        self.run_id
    }

    /// Handle to the run's sample stream.
    pub fn stream(&self) -> SampleStream {
        self.stream.clone()
    }

    /// Subscribe to phase changes.
    pub fn phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Execute the run to a terminal state.
    ///
    /// Never fails: device errors end the run in [`RunPhase::Failed`] and are
    /// recorded in the report.
    pub async fn run(mut self) -> RunReport {
        let started_at = Utc::now();
        info!(
            run_id = %self.run_id,
            device = %self.device,
            mode = %self.request.mode(),
            setpoint = self.request.setpoint(),
            duration = ?self.request.duration(),
            "Run starting"
        );

        let outcome = match self.execute().await {
            Ok(Finish::Completed) => RunOutcome::Completed,
            Ok(Finish::Cancelled) => {
                info!(run_id = %self.run_id, ticks = self.ticks, "Run cancelled");
                RunOutcome::Cancelled
            }
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "Run failed");
                RunOutcome::Failed {
                    message: err.to_string(),
                }
            }
        };

        self.release_drive().await;
        self.stream.close();

        let report = RunReport {
            run_id: self.run_id,
            started_at,
            mode: self.request.mode(),
            setpoint: self.request.setpoint(),
            outcome,
            ticks: self.ticks,
            channels: self
                .stream
                .counts()
                .into_iter()
                .map(|(channel, samples)| ChannelCount { channel, samples })
                .collect(),
        };
        let phase = report.outcome.phase();
        self.set_phase(phase);
        info!(run_id = %self.run_id, phase = %phase, ticks = self.ticks, "Run finished");
        report
    }

    async fn execute(&mut self) -> AppResult<Finish> {
        if self.cancel.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        self.configure().await?;
        if self.cancel.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        if let Finish::Cancelled = self.acquire().await? {
            return Ok(Finish::Cancelled);
        }
        self.settle().await?;
        Ok(Finish::Completed)
    }

    async fn configure(&mut self) -> AppResult<()> {
        let id = self.device;
        let mode = self.request.mode();

        self.session
            .zero_encoder(id)
            .await
            .context("zeroing encoder")?;
        self.session
            .set_control_mode(id, mode)
            .await
            .context("selecting control mode")?;
        self.session
            .set_gains(id, self.request.gains())
            .await
            .context("applying gains")?;
        match mode {
            ControlMode::Velocity => self.session.set_target_velocity(id, 0.0).await?,
            ControlMode::Position => self.session.set_target_position(id, 0.0).await?,
        }
        self.session
            .set_profile_velocity(id, self.request.profile_velocity())
            .await?;
        self.session
            .set_torque_limit(id, self.request.torque_limit())
            .await?;
        self.session.enable(id, true).await.context("enabling torque")?;
        self.session.begin().await.context("opening link")?;
        self.link_open = true;

        debug!(run_id = %self.run_id, device = %id, "Drive configured");
        Ok(())
    }

    async fn acquire(&mut self) -> AppResult<Finish> {
        self.set_phase(RunPhase::Acquiring);
        self.stream.seal();

        let channels: Vec<Channel> = self.request.channels().collect();
        let duration = self.request.duration();
        let start = Instant::now();
        let mut ticker = interval_at(start, self.timing.acquisition_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stepped = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Finish::Cancelled),
                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }

            let setpoint = setpoint_stage(elapsed, duration, self.request.setpoint());
            for &channel in &channels {
                let value = self.read_channel(channel, setpoint).await?;
                self.stream.append(channel.name(), elapsed, value)?;
            }

            if !stepped && step_applied(elapsed, duration) {
                self.command_target(setpoint).await?;
                stepped = true;
                debug!(run_id = %self.run_id, ?elapsed, setpoint, "Set-point step applied");
            }
            self.ticks += 1;
        }

        Ok(Finish::Completed)
    }

    async fn settle(&mut self) -> AppResult<()> {
        self.set_phase(RunPhase::Settling);
        if self.request.mode() == ControlMode::Velocity {
            self.session.set_target_velocity(self.device, 0.0).await?;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(run_id = %self.run_id, "Settle grace cut short");
            }
            _ = sleep(self.timing.settle_grace) => {}
        }
        self.release_drive().await;
        Ok(())
    }

    async fn read_channel(&self, channel: Channel, setpoint: f64) -> AppResult<f64> {
        let id = self.device;
        let value = match channel {
            Channel::Velocity => self.session.velocity(id).await?,
            Channel::Position => self.session.position(id).await?,
            Channel::Torque => self.session.torque(id).await?,
            Channel::Temperature => self.session.temperature(id).await?,
            Channel::MaxTorque => self.request.torque_limit(),
            Channel::MaxVelocity => self.request.profile_velocity(),
            Channel::Setpoint => setpoint,
        };
        Ok(value)
    }

    async fn command_target(&self, target: f64) -> AppResult<()> {
        match self.request.mode() {
            ControlMode::Velocity => self.session.set_target_velocity(self.device, target).await?,
            ControlMode::Position => self.session.set_target_position(self.device, target).await?,
        }
        Ok(())
    }

    /// Disable torque (at most once per run) and close the link.
    async fn release_drive(&mut self) {
        if !self.disabled {
            self.disabled = true;
            if let Err(err) = self.session.enable(self.device, false).await {
                warn!(run_id = %self.run_id, device = %self.device, error = %err, "Failed to disable drive");
            }
        }
        if self.link_open {
            self.link_open = false;
            if let Err(err) = self.session.end().await {
                warn!(run_id = %self.run_id, error = %err, "Failed to close link");
            }
        }
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
        debug!(run_id = %self.run_id, phase = %phase, "Run phase");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setpoint_is_zero_until_ramp_fraction() {
        let duration = Duration::from_secs(5);
        assert_eq!(setpoint_stage(Duration::ZERO, duration, 50.0), 0.0);
        assert_eq!(setpoint_stage(Duration::from_millis(500), duration, 50.0), 0.0);
        assert_eq!(setpoint_stage(Duration::from_millis(510), duration, 50.0), 50.0);
        assert_eq!(setpoint_stage(Duration::from_millis(4990), duration, 50.0), 50.0);
    }

    #[test]
    fn negative_setpoints_step_the_same_way() {
        let duration = Duration::from_secs(1);
        assert_eq!(setpoint_stage(Duration::from_millis(100), duration, -2.0), 0.0);
        assert_eq!(setpoint_stage(Duration::from_millis(101), duration, -2.0), -2.0);
    }

    #[test]
    fn step_is_monotonic_in_elapsed_time() {
        let duration = Duration::from_secs(3);
        let mut seen_step = false;
        for ms in (0..3000).step_by(10) {
            let applied = step_applied(Duration::from_millis(ms), duration);
            assert!(!(seen_step && !applied), "step reverted at {ms}ms");
            seen_step |= applied;
        }
        assert!(seen_step);
    }
}
