//! Atomic Actuator Capabilities
//!
//! The device session is split into fine-grained capability traits, each
//! covering one concern of the bus driver:
//!
//! - [`BusDiscovery`]: find and register actuators on the bus
//! - [`RegisterAccess`]: read/write named registers, persist configuration
//! - [`ActuatorControl`]: control mode, gains, limits, targets, torque enable
//! - [`Feedback`]: live velocity/position/torque/temperature readings
//! - [`BusLink`]: begin/end of the physical link (cyclic frame exchange)
//!
//! [`DeviceSession`] is the union of all five and is what the supervisor and
//! the run loop work with.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; drivers use interior mutability for state
//!
//! # Example
//!
//! ```rust,ignore
//! async fn hold_zero<D>(device: &D, id: DeviceId) -> Result<()>
//! where
//!     D: ActuatorControl + BusLink,
//! {
//!     device.set_control_mode(id, ControlMode::Velocity).await?;
//!     device.set_target_velocity(id, 0.0).await?;
//!     device.enable(id, true).await?;
//!     device.begin().await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use super::registers::{ControlMode, PidGains, Register};
use super::DeviceId;

/// Capability: Bus Discovery
///
/// # Contract
/// - `enumerate` pings the bus and returns every responding actuator
/// - An empty result is not an error (no device powered, or mid-restart)
/// - `connect` registers an enumerated actuator for subsequent commands
#[async_trait]
pub trait BusDiscovery: Send + Sync {
    /// Ping the bus and return the ids of every responding actuator.
    async fn enumerate(&self) -> Result<Vec<DeviceId>>;

    /// Register an enumerated actuator with the session.
    async fn connect(&self, id: DeviceId) -> Result<()>;
}

/// Capability: Register Access
///
/// # Contract
/// - Register writes take effect in drive RAM immediately
/// - `persist_config` stores RAM registers to flash and restarts the drive;
///   the drive disappears from enumeration until the restart completes
#[async_trait]
pub trait RegisterAccess: Send + Sync {
    /// Read a named register.
    async fn read_register(&self, id: DeviceId, register: Register) -> Result<f64>;

    /// Write a named register.
    async fn write_register(&self, id: DeviceId, register: Register, value: f64) -> Result<()>;

    /// Store the current configuration and restart the drive.
    async fn persist_config(&self, id: DeviceId) -> Result<()>;
}

/// Capability: Actuator Control
///
/// # Contract
/// - `set_gains` applies to the controller selected by the last
///   `set_control_mode` call
/// - Targets are in mode-native units (rad/s or rad)
/// - `enable(id, false)` removes torque; it must be safe to call repeatedly
#[async_trait]
pub trait ActuatorControl: Send + Sync {
    /// Select the closed-loop control mode.
    async fn set_control_mode(&self, id: DeviceId, mode: ControlMode) -> Result<()>;

    /// Set temporary gains of the active mode's controller.
    async fn set_gains(&self, id: DeviceId, gains: PidGains) -> Result<()>;

    /// Command a velocity target (rad/s).
    async fn set_target_velocity(&self, id: DeviceId, target: f64) -> Result<()>;

    /// Command a position target (rad).
    async fn set_target_position(&self, id: DeviceId, target: f64) -> Result<()>;

    /// Limit the motion profile velocity (rad/s).
    async fn set_profile_velocity(&self, id: DeviceId, velocity: f64) -> Result<()>;

    /// Limit the controller output torque (Nm).
    async fn set_torque_limit(&self, id: DeviceId, torque: f64) -> Result<()>;

    /// Enable or disable torque output.
    async fn enable(&self, id: DeviceId, enabled: bool) -> Result<()>;

    /// Set the current encoder position as the zero reference.
    async fn zero_encoder(&self, id: DeviceId) -> Result<()>;
}

/// Capability: Live Feedback
///
/// Values are the latest ones received over the link and may be stale by up
/// to one link cycle.
#[async_trait]
pub trait Feedback: Send + Sync {
    /// Shaft velocity (rad/s).
    async fn velocity(&self, id: DeviceId) -> Result<f64>;

    /// Shaft position (rad).
    async fn position(&self, id: DeviceId) -> Result<f64>;

    /// Output torque (Nm).
    async fn torque(&self, id: DeviceId) -> Result<f64>;

    /// Motor temperature (°C).
    async fn temperature(&self, id: DeviceId) -> Result<f64>;
}

/// Capability: Physical Link
///
/// While the link is open the bus adapter continuously exchanges command and
/// feedback frames with every connected drive.
#[async_trait]
pub trait BusLink: Send + Sync {
    /// Open the link and start cyclic frame exchange.
    async fn begin(&self) -> Result<()>;

    /// Stop cyclic frame exchange and close the link.
    async fn end(&self) -> Result<()>;
}

/// Full device session: every capability the tuning tool needs.
///
/// # Usage
/// ```rust,ignore
/// // Blanket impl means you just implement the individual traits
/// impl BusDiscovery for MyBus { /* ... */ }
/// impl RegisterAccess for MyBus { /* ... */ }
/// // ...
/// let session: Arc<dyn DeviceSession> = Arc::new(MyBus::open()?);
/// ```
pub trait DeviceSession: BusDiscovery + RegisterAccess + ActuatorControl + Feedback + BusLink {}

/// Blanket implementation - any type implementing all capabilities is a session
impl<T> DeviceSession for T where
    T: BusDiscovery + RegisterAccess + ActuatorControl + Feedback + BusLink
{
}
