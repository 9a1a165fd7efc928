//! Interactive control surfaces.
//!
//! A [`ControlSurface`] shows drive settings and turns user actions into
//! discrete [`Intent`]s. It never blocks: the [`ControlLoop`] polls it at a
//! fixed interval and forwards intents to the task supervisor.
//!
//! - `form`: typed model of the tuning form that assembles run requests
//! - `control_loop`: the perpetual poll loop driving the supervisor
//! - `scripted`: time-ordered intent script (tests, demos)
//! - `console`: line-oriented stdin surface

pub mod console;
pub mod control_loop;
pub mod form;
pub mod scripted;

use uuid::Uuid;

use crate::experiment::{RunReport, RunRequest};
use crate::hardware::{ControlMode, DeviceSnapshot};

pub use console::{parse_command, Command, ConsoleSurface};
pub use control_loop::ControlLoop;
pub use form::TuningForm;
pub use scripted::{ScriptedSurface, SurfaceLog};

/// A discrete user action.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Run a test (or stop the active one)
    Start(RunRequest),
    /// Stop any test and disable the drive
    Stop,
    /// Store gains/limits in the drive
    Save(RunRequest),
    /// Another control mode was selected
    ModeChanged(ControlMode),
    /// The surface is going away
    WindowClosed,
}

/// Feedback shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A new run was spawned
    RunStarted(Uuid),
    /// The active run was stopped instead of starting a new one
    RunStoppedInPlace(Uuid),
    /// Stop request completed
    Stopped,
    /// A run reached a terminal state
    RunFinished(RunReport),
    /// Configuration saved and the drive is back
    Saved(DeviceSnapshot),
    /// Register refresh postponed until the active run ends
    RefreshDeferred(ControlMode),
    /// An intent failed
    Error(String),
}

/// Event source and display for the control loop.
pub trait ControlSurface: Send {
    /// Intents emitted since the previous poll. Must not block.
    fn poll_intents(&mut self) -> Vec<Intent>;

    /// Display register values read from the drive.
    fn show_snapshot(&mut self, snapshot: &DeviceSnapshot);

    /// Pre-fill the set-point field.
    fn suggest_setpoint(&mut self, setpoint: f64);

    /// Surface a notice to the user.
    fn notify(&mut self, notice: Notice);
}
