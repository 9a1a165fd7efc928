//! Actuator hardware layer.
//!
//! - `capabilities`: async capability traits composing the device session
//! - `registers`: register map, control modes, gains and device snapshots
//! - `session`: exclusive, lease-based ownership of the one device session
//! - `mock`: simulated actuator for tests and the headless binary

pub mod capabilities;
pub mod mock;
pub mod registers;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use capabilities::{ActuatorControl, BusDiscovery, BusLink, DeviceSession, Feedback, RegisterAccess};
pub use registers::{ControlMode, DeviceSnapshot, PidGains, Register};
pub use session::{SessionCell, SessionLease};

/// Bus identifier of one actuator (FDCAN id, 10-2047 on real hardware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "md#{}", self.0)
    }
}

impl From<u16> for DeviceId {
    fn from(value: u16) -> Self {
        DeviceId(value)
    }
}
