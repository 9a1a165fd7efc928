//! Typed tuning form.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::experiment::{Channel, RunRequest};
use crate::hardware::{ControlMode, DeviceSnapshot, PidGains};

/// Field values of the tuning form.
///
/// Gains and limits are filled from the drive whenever a snapshot is shown;
/// requests are assembled fresh from the current values.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningForm {
    /// Selected control mode
    pub mode: ControlMode,
    /// Controller gains
    pub gains: PidGains,
    /// Torque limit (Nm)
    pub max_torque: f64,
    /// Profile velocity limit (rad/s)
    pub profile_velocity: f64,
    /// Test duration
    pub duration: Duration,
    /// Step set-point
    pub setpoint: f64,
    shown: BTreeSet<Channel>,
}

impl TuningForm {
    /// Form with velocity mode selected and only the velocity channel shown.
    pub fn new(setpoint: f64, duration: Duration) -> Self {
        Self {
            mode: ControlMode::Velocity,
            gains: PidGains::default(),
            max_torque: 0.0,
            profile_velocity: 0.0,
            duration,
            setpoint,
            shown: BTreeSet::from([Channel::Velocity]),
        }
    }

    /// Copy register values into the form.
    pub fn apply_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        self.mode = snapshot.mode;
        self.gains = snapshot.gains;
        self.max_torque = snapshot.max_torque;
        self.profile_velocity = snapshot.profile_velocity;
    }

    /// Tick or untick a channel checkbox. The set-point is always acquired.
    pub fn set_channel(&mut self, channel: Channel, shown: bool) {
        if channel == Channel::Setpoint {
            return;
        }
        if shown {
            self.shown.insert(channel);
        } else {
            self.shown.remove(&channel);
        }
    }

    /// Whether a channel checkbox is ticked.
    pub fn shows(&self, channel: Channel) -> bool {
        channel == Channel::Setpoint || self.shown.contains(&channel)
    }

    /// Update a numeric field by name.
    ///
    /// Fields: `kp`, `ki`, `kd`, `windup`, `max-torque`, `profile-velocity`,
    /// `setpoint`, `duration` (seconds or humantime, e.g. `2.5` or `500ms`).
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), String> {
        if field == "duration" {
            self.duration = parse_duration(value)?;
            return Ok(());
        }
        let number: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", value))?;
        match field {
            "kp" => self.gains.kp = number,
            "ki" => self.gains.ki = number,
            "kd" => self.gains.kd = number,
            "windup" => self.gains.windup = number,
            "max-torque" => self.max_torque = number,
            "profile-velocity" => self.profile_velocity = number,
            "setpoint" => self.setpoint = number,
            other => return Err(format!("Unknown field '{}'", other)),
        }
        Ok(())
    }

    /// Assemble a run request from the current values.
    pub fn request(&self) -> RunRequest {
        RunRequest::new(self.mode, self.setpoint, self.duration)
            .with_gains(self.gains)
            .with_torque_limit(self.max_torque)
            .with_profile_velocity(self.profile_velocity)
            .with_channels(self.shown.iter().copied())
    }
}

impl Default for TuningForm {
    fn default() -> Self {
        Self::new(50.0, Duration::from_secs(3))
    }
}

impl fmt::Display for TuningForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode             {}", self.mode)?;
        writeln!(
            f,
            "kp / ki / kd     {:.4} / {:.4} / {:.4}",
            self.gains.kp, self.gains.ki, self.gains.kd
        )?;
        writeln!(f, "windup           {:.4}", self.gains.windup)?;
        writeln!(f, "max-torque       {:.4} Nm", self.max_torque)?;
        writeln!(f, "profile-velocity {:.4} rad/s", self.profile_velocity)?;
        writeln!(f, "duration         {:.1} s", self.duration.as_secs_f64())?;
        writeln!(f, "setpoint         {:.4} {}", self.setpoint, self.mode.unit())?;
        let shown: Vec<_> = Channel::ALL
            .iter()
            .filter(|channel| self.shows(**channel))
            .map(|channel| channel.name())
            .collect();
        write!(f, "channels         {}", shown.join(", "))
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string());
    }
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_reflects_fields_and_checkboxes() {
        let mut form = TuningForm::default();
        form.set_field("kp", "0.5").unwrap();
        form.set_field("max-torque", "1.2").unwrap();
        form.set_field("duration", "5").unwrap();
        form.set_channel(Channel::Torque, true);
        form.set_channel(Channel::Velocity, false);

        let request = form.request();
        assert_eq!(request.gains().kp, 0.5);
        assert_eq!(request.torque_limit(), 1.2);
        assert_eq!(request.duration(), Duration::from_secs(5));
        assert_eq!(
            request.channels().collect::<Vec<_>>(),
            vec![Channel::Torque, Channel::Setpoint]
        );
    }

    #[test]
    fn snapshot_overwrites_gains_and_limits() {
        let mut form = TuningForm::default();
        form.apply_snapshot(&DeviceSnapshot {
            mode: ControlMode::Position,
            gains: PidGains::new(20.0, 0.2, 0.0, 1.0),
            max_torque: 1.8,
            profile_velocity: 300.0,
        });
        assert_eq!(form.mode, ControlMode::Position);
        assert_eq!(form.gains.kp, 20.0);
        assert_eq!(form.profile_velocity, 300.0);
    }

    #[test]
    fn setpoint_checkbox_cannot_be_cleared() {
        let mut form = TuningForm::default();
        form.set_channel(Channel::Setpoint, false);
        assert!(form.shows(Channel::Setpoint));
    }

    #[test]
    fn bad_field_values_are_rejected() {
        let mut form = TuningForm::default();
        assert!(form.set_field("kp", "fast").is_err());
        assert!(form.set_field("gain", "1").is_err());
        assert!(form.set_field("duration", "soon").is_err());
        form.set_field("duration", "750ms").unwrap();
        assert_eq!(form.duration, Duration::from_millis(750));
    }
}
