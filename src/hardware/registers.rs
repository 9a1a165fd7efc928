//! Register map, control modes and cached register snapshots.
//!
//! The drive exposes one PID controller per control mode. Which registers a
//! save writes and which a mode change reads back depends on the mode:
//!
//! | Mode     | gains                   | limit written on save |
//! |----------|-------------------------|-----------------------|
//! | Velocity | `motorVelPid{Kp,Ki,Kd,Windup}` | `motorVelPidOutMax` (torque) |
//! | Position | `motorPosPid{Kp,Ki,Kd,Windup}` | `profileVelocity`            |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed-loop control mode of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Velocity PID; set-point in rad/s.
    #[default]
    Velocity,
    /// Position PID; set-point in rad.
    Position,
}

impl ControlMode {
    /// Gain registers of this mode's controller, in kp, ki, kd, windup order.
    pub fn gain_registers(self) -> [Register; 4] {
        match self {
            ControlMode::Velocity => [
                Register::VelPidKp,
                Register::VelPidKi,
                Register::VelPidKd,
                Register::VelPidWindup,
            ],
            ControlMode::Position => [
                Register::PosPidKp,
                Register::PosPidKi,
                Register::PosPidKd,
                Register::PosPidWindup,
            ],
        }
    }

    /// Unit of the set-point in this mode.
    pub fn unit(self) -> &'static str {
        match self {
            ControlMode::Velocity => "rad/s",
            ControlMode::Position => "rad",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Velocity => write!(f, "velocity"),
            ControlMode::Position => write!(f, "position"),
        }
    }
}

impl FromStr for ControlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "velocity" | "vel" | "velocity mode" => Ok(ControlMode::Velocity),
            "position" | "pos" | "position mode" => Ok(ControlMode::Position),
            other => Err(format!(
                "Invalid control mode '{}'. Must be one of: velocity, position",
                other
            )),
        }
    }
}

/// Named drive registers used by the tuning tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Register {
    VelPidKp,
    VelPidKi,
    VelPidKd,
    VelPidWindup,
    VelPidOutMax,
    PosPidKp,
    PosPidKi,
    PosPidKd,
    PosPidWindup,
    PosPidOutMax,
    ProfileVelocity,
}

impl Register {
    /// Every register, in register-map order.
    pub const ALL: [Register; 11] = [
        Register::VelPidKp,
        Register::VelPidKi,
        Register::VelPidKd,
        Register::VelPidWindup,
        Register::VelPidOutMax,
        Register::PosPidKp,
        Register::PosPidKi,
        Register::PosPidKd,
        Register::PosPidWindup,
        Register::PosPidOutMax,
        Register::ProfileVelocity,
    ];

    /// Register name as used by the drive firmware.
    pub fn name(self) -> &'static str {
        match self {
            Register::VelPidKp => "motorVelPidKp",
            Register::VelPidKi => "motorVelPidKi",
            Register::VelPidKd => "motorVelPidKd",
            Register::VelPidWindup => "motorVelPidWindup",
            Register::VelPidOutMax => "motorVelPidOutMax",
            Register::PosPidKp => "motorPosPidKp",
            Register::PosPidKi => "motorPosPidKi",
            Register::PosPidKd => "motorPosPidKd",
            Register::PosPidWindup => "motorPosPidWindup",
            Register::PosPidOutMax => "motorPosPidOutMax",
            Register::ProfileVelocity => "profileVelocity",
        }
    }

    /// Mode whose controller owns this register, `None` for shared registers.
    pub fn mode(self) -> Option<ControlMode> {
        match self {
            Register::VelPidKp
            | Register::VelPidKi
            | Register::VelPidKd
            | Register::VelPidWindup
            | Register::VelPidOutMax => Some(ControlMode::Velocity),
            Register::PosPidKp
            | Register::PosPidKi
            | Register::PosPidKd
            | Register::PosPidWindup
            | Register::PosPidOutMax => Some(ControlMode::Position),
            Register::ProfileVelocity => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Register::ALL
            .into_iter()
            .find(|reg| reg.name() == s)
            .ok_or_else(|| format!("Unknown register '{}'", s))
    }
}

/// PID controller gains.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Anti-windup: maximal output of the integral part
    pub windup: f64,
}

impl PidGains {
    /// Create gains from their four components.
    pub fn new(kp: f64, ki: f64, kd: f64, windup: f64) -> Self {
        Self { kp, ki, kd, windup }
    }

    /// Gains in kp, ki, kd, windup order (matches [`ControlMode::gain_registers`]).
    pub fn as_array(&self) -> [f64; 4] {
        [self.kp, self.ki, self.kd, self.windup]
    }
}

/// Register values for one control mode, as shown on the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Mode the gains belong to
    pub mode: ControlMode,
    /// Controller gains of `mode`
    pub gains: PidGains,
    /// Velocity loop output limit (torque, Nm)
    pub max_torque: f64,
    /// Motion profile velocity limit (rad/s)
    pub profile_velocity: f64,
}

impl DeviceSnapshot {
    /// Registers read to build a snapshot for `mode`.
    ///
    /// The torque limit always comes from the velocity loop output, since the
    /// velocity loop is the one producing torque in both modes.
    pub fn registers(mode: ControlMode) -> [Register; 6] {
        let [kp, ki, kd, windup] = mode.gain_registers();
        [kp, ki, kd, windup, Register::VelPidOutMax, Register::ProfileVelocity]
    }

    /// Build a snapshot from values read in [`DeviceSnapshot::registers`] order.
    pub fn from_values(mode: ControlMode, values: [f64; 6]) -> Self {
        let [kp, ki, kd, windup, max_torque, profile_velocity] = values;
        Self {
            mode,
            gains: PidGains::new(kp, ki, kd, windup),
            max_torque,
            profile_velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_round_trip_through_from_str() {
        for reg in Register::ALL {
            assert_eq!(reg.name().parse::<Register>(), Ok(reg));
        }
        assert!("motorFooKp".parse::<Register>().is_err());
    }

    #[test]
    fn gain_registers_belong_to_their_mode() {
        for mode in [ControlMode::Velocity, ControlMode::Position] {
            for reg in mode.gain_registers() {
                assert_eq!(reg.mode(), Some(mode));
            }
        }
    }

    #[test]
    fn snapshot_reads_torque_limit_from_velocity_loop() {
        let regs = DeviceSnapshot::registers(ControlMode::Position);
        assert_eq!(regs[0], Register::PosPidKp);
        assert_eq!(regs[4], Register::VelPidOutMax);
        assert_eq!(regs[5], Register::ProfileVelocity);
    }

    #[test]
    fn control_mode_parses_surface_labels() {
        assert_eq!("Velocity Mode".parse::<ControlMode>(), Ok(ControlMode::Velocity));
        assert_eq!("pos".parse::<ControlMode>(), Ok(ControlMode::Position));
        assert!("torque".parse::<ControlMode>().is_err());
    }
}
