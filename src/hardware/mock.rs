//! Mock Actuator
//!
//! Simulated actuator bus for testing without physical hardware. All timing
//! uses `tokio::time::Instant`, so tests running with a paused clock see
//! deterministic dynamics.
//!
//! # Behaviour
//!
//! - First-order velocity response (50ms time constant), clamped by the
//!   torque limit; position mode runs a proportional outer loop limited by
//!   the profile velocity
//! - `persist_config` restarts the drive: it drops out of enumeration for a
//!   configurable number of polls and must be reconnected
//! - Every call is recorded in an event journal for assertions
//! - Feedback faults and bus outages can be injected

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tokio::time::Instant;
use tracing::debug;

use super::capabilities::{ActuatorControl, BusDiscovery, BusLink, Feedback, RegisterAccess};
use super::registers::{ControlMode, PidGains, Register};
use super::DeviceId;

/// Velocity response time constant (seconds).
const VELOCITY_TAU_S: f64 = 0.05;

/// Rotor inertia used to derive torque from acceleration (kg·m²).
const ROTOR_INERTIA: f64 = 0.002;

/// Outer position loop gain used by the simulation (1/s).
const POSITION_LOOP_GAIN: f64 = 8.0;

const AMBIENT_TEMPERATURE_C: f64 = 25.0;

/// Default register file of a freshly powered drive.
fn default_registers() -> HashMap<Register, f64> {
    HashMap::from([
        (Register::VelPidKp, 0.1),
        (Register::VelPidKi, 0.2),
        (Register::VelPidKd, 0.0),
        (Register::VelPidWindup, 1.0),
        (Register::VelPidOutMax, 1.8),
        (Register::PosPidKp, 20.0),
        (Register::PosPidKi, 0.2),
        (Register::PosPidKd, 0.0),
        (Register::PosPidWindup, 1.0),
        (Register::PosPidOutMax, 300.0),
        (Register::ProfileVelocity, 300.0),
    ])
}

/// One recorded call on the mock bus.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum MockEvent {
    Enumerate { found: usize },
    Connect(DeviceId),
    ReadRegister(DeviceId, Register),
    WriteRegister(DeviceId, Register, f64),
    Persist(DeviceId),
    SetMode(DeviceId, ControlMode),
    SetGains(DeviceId, ControlMode, PidGains),
    SetTargetVelocity(DeviceId, f64),
    SetTargetPosition(DeviceId, f64),
    SetProfileVelocity(DeviceId, f64),
    SetTorqueLimit(DeviceId, f64),
    Enable(DeviceId, bool),
    ZeroEncoder(DeviceId),
    Begin,
    End,
}

#[derive(Debug, Default)]
struct MotorModel {
    velocity: f64,
    position: f64,
    torque: f64,
    temperature: f64,
    last_update: Option<Instant>,
}

#[derive(Debug)]
struct DriveState {
    registers: HashMap<Register, f64>,
    mode: ControlMode,
    gains: PidGains,
    target_velocity: f64,
    target_position: f64,
    profile_velocity: f64,
    torque_limit: f64,
    enabled: bool,
    encoder_offset: f64,
    motor: MotorModel,
}

impl DriveState {
    fn new(registers: HashMap<Register, f64>) -> Self {
        let torque_limit = registers.get(&Register::VelPidOutMax).copied().unwrap_or(1.8);
        let profile_velocity = registers
            .get(&Register::ProfileVelocity)
            .copied()
            .unwrap_or(300.0);
        Self {
            registers,
            mode: ControlMode::Velocity,
            gains: PidGains::default(),
            target_velocity: 0.0,
            target_position: 0.0,
            profile_velocity,
            torque_limit,
            enabled: false,
            encoder_offset: 0.0,
            motor: MotorModel {
                temperature: AMBIENT_TEMPERATURE_C,
                ..Default::default()
            },
        }
    }

    /// Advance the motor model to `now`.
    fn advance(&mut self, now: Instant, link_open: bool) {
        let Some(last) = self.motor.last_update.replace(now) else {
            return;
        };
        let dt = now.saturating_duration_since(last).as_secs_f64();
        if dt <= 0.0 {
            return;
        }

        let commanded = if self.enabled && link_open {
            match self.mode {
                ControlMode::Velocity => self.target_velocity,
                ControlMode::Position => {
                    let error = self.target_position - (self.motor.position - self.encoder_offset);
                    (POSITION_LOOP_GAIN * error).clamp(-self.profile_velocity, self.profile_velocity)
                }
            }
        } else {
            0.0
        };

        let alpha = 1.0 - (-dt / VELOCITY_TAU_S).exp();
        let max_delta = if self.enabled && link_open {
            self.torque_limit / ROTOR_INERTIA * dt
        } else {
            f64::INFINITY
        };
        let delta = ((commanded - self.motor.velocity) * alpha).clamp(-max_delta, max_delta);
        self.motor.velocity += delta;
        self.motor.position += self.motor.velocity * dt;
        self.motor.torque = if self.enabled && link_open {
            (ROTOR_INERTIA * delta / dt).clamp(-self.torque_limit, self.torque_limit)
        } else {
            0.0
        };
        let heating = 0.5 * self.motor.torque.abs();
        let cooling = 0.02 * (self.motor.temperature - AMBIENT_TEMPERATURE_C);
        self.motor.temperature += (heating - cooling) * dt;
    }
}

#[derive(Debug)]
struct MockState {
    drives: HashMap<DeviceId, DriveState>,
    present: Vec<DeviceId>,
    connected: BTreeSet<DeviceId>,
    reachable: bool,
    offline_polls: usize,
    link_open: bool,
    link_overlaps: usize,
    feedback_reads: usize,
    feedback_fault_after: Option<usize>,
    journal: Vec<MockEvent>,
}

/// Simulated actuator bus implementing every device capability.
///
/// # Example
///
/// ```rust,ignore
/// let bus = MockActuator::new();
/// let ids = bus.enumerate().await?;
/// bus.connect(ids[0]).await?;
/// bus.set_target_velocity(ids[0], 10.0).await?;
/// ```
#[derive(Debug)]
pub struct MockActuator {
    state: Mutex<MockState>,
    restart_polls: usize,
}

impl MockActuator {
    /// Bus with a single drive at id 100 and default registers.
    pub fn new() -> Self {
        Self::with_devices(&[DeviceId(100)])
    }

    /// Bus with the given drives, all with default registers.
    pub fn with_devices(ids: &[DeviceId]) -> Self {
        let drives = ids
            .iter()
            .map(|id| (*id, DriveState::new(default_registers())))
            .collect();
        Self {
            state: Mutex::new(MockState {
                drives,
                present: ids.to_vec(),
                connected: BTreeSet::new(),
                reachable: true,
                offline_polls: 0,
                link_open: false,
                link_overlaps: 0,
                feedback_reads: 0,
                feedback_fault_after: None,
                journal: Vec::new(),
            }),
            restart_polls: 2,
        }
    }

    /// Number of empty enumerations after a `persist_config` restart.
    pub fn with_restart_polls(mut self, polls: usize) -> Self {
        self.restart_polls = polls;
        self
    }

    /// Override one register on every drive.
    pub fn with_register(self, register: Register, value: f64) -> Self {
        {
            let mut state = self.state.lock();
            for drive in state.drives.values_mut() {
                drive.registers.insert(register, value);
                if register == Register::VelPidOutMax {
                    drive.torque_limit = value;
                }
                if register == Register::ProfileVelocity {
                    drive.profile_velocity = value;
                }
            }
        }
        self
    }

    /// Make the whole bus (un)reachable; an unreachable bus enumerates empty.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Fail every feedback read after `reads` successful ones.
    pub fn fail_feedback_after(&self, reads: usize) {
        let mut state = self.state.lock();
        state.feedback_fault_after = Some(state.feedback_reads + reads);
    }

    /// Recorded calls, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().journal.clone()
    }

    /// Forget recorded calls.
    pub fn clear_events(&self) {
        self.state.lock().journal.clear();
    }

    /// Number of `enable(_, false)` calls recorded.
    pub fn disable_count(&self) -> usize {
        self.count(|event| matches!(event, MockEvent::Enable(_, false)))
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.state.lock().journal.iter().filter(|e| predicate(e)).count()
    }

    /// Registers written since the journal was last cleared.
    pub fn written_registers(&self) -> Vec<(Register, f64)> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|event| match event {
                MockEvent::WriteRegister(_, reg, value) => Some((*reg, *value)),
                _ => None,
            })
            .collect()
    }

    /// Times `begin` was called while the link was already open.
    pub fn link_overlaps(&self) -> usize {
        self.state.lock().link_overlaps
    }

    /// Whether the link is currently open.
    pub fn link_open(&self) -> bool {
        self.state.lock().link_open
    }

    /// Whether torque is enabled on `id`.
    pub fn is_enabled(&self, id: DeviceId) -> bool {
        self.state
            .lock()
            .drives
            .get(&id)
            .map(|drive| drive.enabled)
            .unwrap_or(false)
    }

    /// Stored register value, bypassing the journal.
    pub fn register(&self, id: DeviceId, register: Register) -> Option<f64> {
        self.state
            .lock()
            .drives
            .get(&id)
            .and_then(|drive| drive.registers.get(&register).copied())
    }

    fn with_drive<T>(
        &self,
        id: DeviceId,
        event: MockEvent,
        f: impl FnOnce(&mut DriveState, bool) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if state.offline_polls > 0 || !state.reachable {
            bail!("{}: no response (drive offline)", id);
        }
        if !state.connected.contains(&id) {
            bail!("{}: not connected", id);
        }
        state.journal.push(event);
        let link_open = state.link_open;
        let drive = state
            .drives
            .get_mut(&id)
            .ok_or_else(|| anyhow!("{}: unknown drive", id))?;
        Ok(f(drive, link_open))
    }

    fn read_feedback(&self, id: DeviceId, pick: impl FnOnce(&DriveState) -> f64) -> Result<f64> {
        let mut state = self.state.lock();
        if let Some(limit) = state.feedback_fault_after {
            if state.feedback_reads >= limit {
                bail!("{}: feedback frame lost", id);
            }
        }
        state.feedback_reads += 1;
        if !state.connected.contains(&id) {
            bail!("{}: not connected", id);
        }
        let link_open = state.link_open;
        let drive = state
            .drives
            .get_mut(&id)
            .ok_or_else(|| anyhow!("{}: unknown drive", id))?;
        drive.advance(Instant::now(), link_open);
        Ok(pick(drive))
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusDiscovery for MockActuator {
    async fn enumerate(&self) -> Result<Vec<DeviceId>> {
        let mut state = self.state.lock();
        let found = if !state.reachable {
            Vec::new()
        } else if state.offline_polls > 0 {
            state.offline_polls -= 1;
            Vec::new()
        } else {
            state.present.clone()
        };
        debug!(found = found.len(), "MockActuator: enumerate");
        state.journal.push(MockEvent::Enumerate { found: found.len() });
        Ok(found)
    }

    async fn connect(&self, id: DeviceId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.present.contains(&id) || state.offline_polls > 0 || !state.reachable {
            bail!("{}: not present on bus", id);
        }
        state.connected.insert(id);
        state.journal.push(MockEvent::Connect(id));
        debug!(device = %id, "MockActuator: connected");
        Ok(())
    }
}

#[async_trait]
impl RegisterAccess for MockActuator {
    async fn read_register(&self, id: DeviceId, register: Register) -> Result<f64> {
        self.with_drive(id, MockEvent::ReadRegister(id, register), |drive, _| {
            drive.registers.get(&register).copied()
        })?
        .ok_or_else(|| anyhow!("{}: register {} not implemented", id, register))
    }

    async fn write_register(&self, id: DeviceId, register: Register, value: f64) -> Result<()> {
        self.with_drive(id, MockEvent::WriteRegister(id, register, value), |drive, _| {
            drive.registers.insert(register, value);
        })
    }

    async fn persist_config(&self, id: DeviceId) -> Result<()> {
        self.with_drive(id, MockEvent::Persist(id), |drive, _| {
            // Restart: RAM state is rebuilt from the stored registers.
            let registers = std::mem::take(&mut drive.registers);
            *drive = DriveState::new(registers);
        })?;
        let mut state = self.state.lock();
        state.offline_polls = self.restart_polls;
        state.connected.clear();
        state.link_open = false;
        debug!(device = %id, polls = self.restart_polls, "MockActuator: restarting");
        Ok(())
    }
}

#[async_trait]
impl ActuatorControl for MockActuator {
    async fn set_control_mode(&self, id: DeviceId, mode: ControlMode) -> Result<()> {
        self.with_drive(id, MockEvent::SetMode(id, mode), |drive, _| {
            drive.mode = mode;
        })
    }

    async fn set_gains(&self, id: DeviceId, gains: PidGains) -> Result<()> {
        let mode = self
            .state
            .lock()
            .drives
            .get(&id)
            .map(|drive| drive.mode)
            .unwrap_or_default();
        self.with_drive(id, MockEvent::SetGains(id, mode, gains), |drive, _| {
            drive.gains = gains;
        })
    }

    async fn set_target_velocity(&self, id: DeviceId, target: f64) -> Result<()> {
        self.with_drive(id, MockEvent::SetTargetVelocity(id, target), |drive, link| {
            drive.advance(Instant::now(), link);
            drive.target_velocity = target;
        })
    }

    async fn set_target_position(&self, id: DeviceId, target: f64) -> Result<()> {
        self.with_drive(id, MockEvent::SetTargetPosition(id, target), |drive, link| {
            drive.advance(Instant::now(), link);
            drive.target_position = target;
        })
    }

    async fn set_profile_velocity(&self, id: DeviceId, velocity: f64) -> Result<()> {
        self.with_drive(id, MockEvent::SetProfileVelocity(id, velocity), |drive, _| {
            drive.profile_velocity = velocity.abs();
        })
    }

    async fn set_torque_limit(&self, id: DeviceId, torque: f64) -> Result<()> {
        self.with_drive(id, MockEvent::SetTorqueLimit(id, torque), |drive, _| {
            drive.torque_limit = torque.abs();
        })
    }

    async fn enable(&self, id: DeviceId, enabled: bool) -> Result<()> {
        self.with_drive(id, MockEvent::Enable(id, enabled), |drive, link| {
            drive.advance(Instant::now(), link);
            drive.enabled = enabled;
        })?;
        debug!(device = %id, enabled, "MockActuator: torque enable");
        Ok(())
    }

    async fn zero_encoder(&self, id: DeviceId) -> Result<()> {
        self.with_drive(id, MockEvent::ZeroEncoder(id), |drive, _| {
            drive.encoder_offset = drive.motor.position;
        })
    }
}

#[async_trait]
impl Feedback for MockActuator {
    async fn velocity(&self, id: DeviceId) -> Result<f64> {
        self.read_feedback(id, |drive| drive.motor.velocity)
    }

    async fn position(&self, id: DeviceId) -> Result<f64> {
        self.read_feedback(id, |drive| drive.motor.position - drive.encoder_offset)
    }

    async fn torque(&self, id: DeviceId) -> Result<f64> {
        self.read_feedback(id, |drive| drive.motor.torque)
    }

    async fn temperature(&self, id: DeviceId) -> Result<f64> {
        self.read_feedback(id, |drive| drive.motor.temperature)
    }
}

#[async_trait]
impl BusLink for MockActuator {
    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.link_open {
            state.link_overlaps += 1;
        }
        state.link_open = true;
        state.journal.push(MockEvent::Begin);
        debug!("MockActuator: link open");
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.link_open = false;
        state.journal.push(MockEvent::End);
        debug!("MockActuator: link closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    async fn connected() -> (MockActuator, DeviceId) {
        let bus = MockActuator::new();
        let id = bus.enumerate().await.unwrap()[0];
        bus.connect(id).await.unwrap();
        (bus, id)
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let bus = MockActuator::new();
        assert!(bus.enable(DeviceId(100), true).await.is_err());
        bus.connect(DeviceId(100)).await.unwrap();
        assert!(bus.enable(DeviceId(100), true).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn velocity_follows_target_when_enabled() {
        let (bus, id) = connected().await;
        bus.set_control_mode(id, ControlMode::Velocity).await.unwrap();
        bus.enable(id, true).await.unwrap();
        bus.begin().await.unwrap();
        bus.velocity(id).await.unwrap();
        bus.set_target_velocity(id, 10.0).await.unwrap();

        advance(Duration::from_millis(500)).await;
        let velocity = bus.velocity(id).await.unwrap();
        assert!((velocity - 10.0).abs() < 0.1, "velocity {velocity}");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_motor_does_not_move() {
        let (bus, id) = connected().await;
        bus.begin().await.unwrap();
        bus.velocity(id).await.unwrap();
        bus.set_target_velocity(id, 10.0).await.unwrap();

        advance(Duration::from_millis(500)).await;
        assert_eq!(bus.velocity(id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn persist_restarts_drive() {
        let (bus, id) = connected().await;
        bus.write_register(id, Register::VelPidKp, 0.7).await.unwrap();
        bus.persist_config(id).await.unwrap();

        assert!(bus.enable(id, false).await.is_err());
        assert!(bus.enumerate().await.unwrap().is_empty());
        assert!(bus.enumerate().await.unwrap().is_empty());
        assert_eq!(bus.enumerate().await.unwrap(), vec![id]);

        bus.connect(id).await.unwrap();
        assert_eq!(bus.read_register(id, Register::VelPidKp).await.unwrap(), 0.7);
    }

    #[tokio::test]
    async fn injected_feedback_fault() {
        let (bus, id) = connected().await;
        bus.fail_feedback_after(2);
        assert!(bus.velocity(id).await.is_ok());
        assert!(bus.torque(id).await.is_ok());
        assert!(bus.velocity(id).await.is_err());
    }

    #[tokio::test]
    async fn journal_counts_disables_and_link_overlaps() {
        let (bus, id) = connected().await;
        bus.begin().await.unwrap();
        bus.begin().await.unwrap();
        bus.enable(id, false).await.unwrap();
        bus.end().await.unwrap();

        assert_eq!(bus.link_overlaps(), 1);
        assert_eq!(bus.disable_count(), 1);
        assert!(!bus.link_open());
    }
}
