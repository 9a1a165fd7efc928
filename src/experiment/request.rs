//! Run requests: the immutable parameters of one step-response test.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::data::LineStyle;
use crate::error::{AppResult, TunerError};
use crate::hardware::{ControlMode, PidGains, Register};

/// Longest test the tool accepts.
pub const MAX_TEST_DURATION: Duration = Duration::from_secs(30);

/// Telemetry channel a run can acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Shaft velocity (rad/s)
    Velocity,
    /// Shaft position (rad)
    Position,
    /// Output torque (Nm)
    Torque,
    /// Motor temperature (°C)
    Temperature,
    /// Torque limit reference line
    MaxTorque,
    /// Profile velocity limit reference line
    MaxVelocity,
    /// Effective set-point (always acquired)
    Setpoint,
}

impl Channel {
    /// Every channel, in display order.
    pub const ALL: [Channel; 7] = [
        Channel::Velocity,
        Channel::Position,
        Channel::Torque,
        Channel::Temperature,
        Channel::MaxTorque,
        Channel::MaxVelocity,
        Channel::Setpoint,
    ];

    /// Stream name of the channel.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Velocity => "velocity",
            Channel::Position => "position",
            Channel::Torque => "torque",
            Channel::Temperature => "temperature",
            Channel::MaxTorque => "max-torque",
            Channel::MaxVelocity => "max-velocity",
            Channel::Setpoint => "set-point",
        }
    }

    /// Human label with units, for renderers.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Velocity => "Velocity [rad/s]",
            Channel::Position => "Position [rad]",
            Channel::Torque => "Torque [Nm]",
            Channel::Temperature => "Temperature [C]",
            Channel::MaxTorque => "Torque Max [Nm]",
            Channel::MaxVelocity => "Profile Velocity [rad/s]",
            Channel::Setpoint => "Setpoint",
        }
    }

    /// Marker channels carry a constant limit instead of a measurement.
    pub fn is_marker(self) -> bool {
        matches!(self, Channel::MaxTorque | Channel::MaxVelocity)
    }

    /// Line style used when declaring the channel.
    pub fn style(self) -> LineStyle {
        if self.is_marker() {
            LineStyle::Dashed
        } else {
            LineStyle::Solid
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Channel::ALL
            .into_iter()
            .find(|channel| channel.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Channel::ALL.iter().map(|c| c.name()).collect();
                format!("Unknown channel '{}'. Must be one of: {}", s, names.join(", "))
            })
    }
}

/// Parameters of one test run.
///
/// Built fresh from the control surface fields whenever a run (or a save) is
/// requested and never mutated afterwards. Only the builder creates one, so
/// the set-point channel is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest {
    mode: ControlMode,
    setpoint: f64,
    gains: PidGains,
    torque_limit: f64,
    profile_velocity: f64,
    #[serde(with = "humantime_serde")]
    duration: Duration,
    channels: BTreeSet<Channel>,
}

impl RunRequest {
    /// Request with zero gains/limits and only the set-point channel.
    pub fn new(mode: ControlMode, setpoint: f64, duration: Duration) -> Self {
        Self {
            mode,
            setpoint,
            gains: PidGains::default(),
            torque_limit: 0.0,
            profile_velocity: 0.0,
            duration,
            channels: BTreeSet::from([Channel::Setpoint]),
        }
    }

    /// Set the controller gains.
    pub fn with_gains(mut self, gains: PidGains) -> Self {
        self.gains = gains;
        self
    }

    /// Set the output torque limit (Nm).
    pub fn with_torque_limit(mut self, torque: f64) -> Self {
        self.torque_limit = torque;
        self
    }

    /// Set the profile velocity limit (rad/s).
    pub fn with_profile_velocity(mut self, velocity: f64) -> Self {
        self.profile_velocity = velocity;
        self
    }

    /// Add a channel to acquire.
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel);
        self
    }

    /// Add several channels to acquire.
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels.extend(channels);
        self
    }

    /// Control mode of the test.
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Requested set-point after the step.
    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Controller gains.
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Torque limit (Nm).
    pub fn torque_limit(&self) -> f64 {
        self.torque_limit
    }

    /// Profile velocity limit (rad/s).
    pub fn profile_velocity(&self) -> f64 {
        self.profile_velocity
    }

    /// Acquisition window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Channels to acquire; always contains [`Channel::Setpoint`].
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.iter().copied()
    }

    /// Whether `channel` is acquired.
    pub fn acquires(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }

    /// Registers (and values) a configuration save writes for this request.
    ///
    /// Velocity mode stores the velocity gains and the torque limit as the
    /// velocity loop output limit. Position mode stores the position gains and
    /// the profile velocity; it never touches velocity-loop registers.
    pub fn save_registers(&self) -> [(Register, f64); 5] {
        let [kp, ki, kd, windup] = self.mode.gain_registers();
        let [vkp, vki, vkd, vwindup] = self.gains.as_array();
        let limit = match self.mode {
            ControlMode::Velocity => (Register::VelPidOutMax, self.torque_limit),
            ControlMode::Position => (Register::ProfileVelocity, self.profile_velocity),
        };
        [(kp, vkp), (ki, vki), (kd, vkd), (windup, vwindup), limit]
    }

    /// Check that the request describes a runnable test.
    pub fn validate(&self) -> AppResult<()> {
        let numbers = [
            ("setpoint", self.setpoint),
            ("kp", self.gains.kp),
            ("ki", self.gains.ki),
            ("kd", self.gains.kd),
            ("windup", self.gains.windup),
            ("torque limit", self.torque_limit),
            ("profile velocity", self.profile_velocity),
        ];
        for (name, value) in numbers {
            if !value.is_finite() {
                return Err(TunerError::InvalidRequest(format!("{name} must be finite")));
            }
        }
        for (name, value) in &numbers[1..] {
            if *value < 0.0 {
                return Err(TunerError::InvalidRequest(format!(
                    "{name} must not be negative (got {value})"
                )));
            }
        }
        if self.duration.is_zero() || self.duration > MAX_TEST_DURATION {
            return Err(TunerError::InvalidRequest(format!(
                "duration must be in (0, {}s], got {:?}",
                MAX_TEST_DURATION.as_secs(),
                self.duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: ControlMode) -> RunRequest {
        RunRequest::new(mode, 50.0, Duration::from_secs(5))
            .with_gains(PidGains::new(0.1, 0.2, 0.3, 0.4))
            .with_torque_limit(1.5)
            .with_profile_velocity(25.0)
    }

    #[test]
    fn setpoint_channel_is_always_acquired() {
        let req = RunRequest::new(ControlMode::Velocity, 1.0, Duration::from_secs(1));
        assert_eq!(req.channels().collect::<Vec<_>>(), vec![Channel::Setpoint]);
    }

    #[test]
    fn setpoint_channel_survives_channel_selection() {
        let req = RunRequest::new(ControlMode::Velocity, 1.0, Duration::from_secs(1))
            .with_channels([Channel::Velocity, Channel::Torque]);
        assert!(req.acquires(Channel::Setpoint));

        let json = serde_json::to_value(&req).unwrap();
        let channels = json["channels"].as_array().unwrap();
        assert!(channels.contains(&serde_json::json!("setpoint")));
        assert_eq!(channels.len(), 3);
    }

    #[test]
    fn velocity_save_writes_torque_limit() {
        let regs = request(ControlMode::Velocity).save_registers();
        assert_eq!(regs[0], (Register::VelPidKp, 0.1));
        assert_eq!(regs[3], (Register::VelPidWindup, 0.4));
        assert_eq!(regs[4], (Register::VelPidOutMax, 1.5));
    }

    #[test]
    fn position_save_never_touches_velocity_registers() {
        let regs = request(ControlMode::Position).save_registers();
        assert!(regs
            .iter()
            .all(|(reg, _)| reg.mode() != Some(ControlMode::Velocity)));
        assert_eq!(regs[4], (Register::ProfileVelocity, 25.0));
    }

    #[test]
    fn validation_rejects_bad_duration_and_values() {
        assert!(request(ControlMode::Velocity).validate().is_ok());
        let zero = RunRequest::new(ControlMode::Velocity, 1.0, Duration::ZERO);
        assert!(zero.validate().is_err());
        let long = RunRequest::new(ControlMode::Velocity, 1.0, Duration::from_secs(31));
        assert!(long.validate().is_err());
        let nan = RunRequest::new(ControlMode::Velocity, f64::NAN, Duration::from_secs(1));
        assert!(nan.validate().is_err());
        let negative = request(ControlMode::Velocity).with_gains(PidGains::new(-1.0, 0.0, 0.0, 0.0));
        assert!(negative.validate().is_err());
    }

    #[test]
    fn negative_setpoint_is_allowed() {
        let req = RunRequest::new(ControlMode::Position, -3.0, Duration::from_secs(1));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn channel_names_parse() {
        assert_eq!("max-torque".parse::<Channel>(), Ok(Channel::MaxTorque));
        assert_eq!("Velocity".parse::<Channel>(), Ok(Channel::Velocity));
        assert!("current".parse::<Channel>().is_err());
        assert_eq!(Channel::MaxVelocity.style(), LineStyle::Dashed);
    }
}
