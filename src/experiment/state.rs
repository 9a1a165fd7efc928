//! Run lifecycle states and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hardware::ControlMode;

/// Run loop lifecycle state.
///
/// # State Machine
///
/// ```text
/// Configuring ──> Acquiring ──> Settling ──> Closed
///      │              │
///      ├──cancel──────┴──> Cancelled
///      └──device error─┴──> Failed
/// ```
///
/// `Closed`, `Cancelled` and `Failed` are terminal. A terminal run has
/// disabled its drive and closed its sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    /// Pushing mode, gains and limits to the drive
    Configuring,
    /// Sampling inside the test window
    Acquiring,
    /// Window elapsed, motor coming to rest
    Settling,
    /// Completed normally
    Closed,
    /// Stopped by a cancellation request
    Cancelled,
    /// Aborted by a device error
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Configuring => write!(f, "Configuring"),
            RunPhase::Acquiring => write!(f, "Acquiring"),
            RunPhase::Settling => write!(f, "Settling"),
            RunPhase::Closed => write!(f, "Closed"),
            RunPhase::Cancelled => write!(f, "Cancelled"),
            RunPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl RunPhase {
    /// Whether the run has finished (normally or not).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Closed | RunPhase::Cancelled | RunPhase::Failed
        )
    }

    /// Whether the run still owns the control loop of the drive.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// Full window acquired and the motor settled
    Completed,
    /// Cancelled before the window elapsed
    Cancelled,
    /// A device operation failed
    Failed {
        /// Rendered error chain
        message: String,
    },
}

impl RunOutcome {
    /// Terminal phase corresponding to this outcome.
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Completed => RunPhase::Closed,
            RunOutcome::Cancelled => RunPhase::Cancelled,
            RunOutcome::Failed { .. } => RunPhase::Failed,
        }
    }
}

/// Number of samples acquired on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCount {
    /// Channel name
    pub channel: String,
    /// Samples appended
    pub samples: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Wall-clock time the run was started
    pub started_at: DateTime<Utc>,
    /// Control mode of the test
    pub mode: ControlMode,
    /// Requested set-point
    pub setpoint: f64,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Acquisition ticks executed
    pub ticks: u64,
    /// Samples per channel, in declaration order
    pub channels: Vec<ChannelCount>,
}

impl RunReport {
    /// Samples acquired on `channel`, zero if it was not acquired.
    pub fn samples(&self, channel: &str) -> usize {
        self.channels
            .iter()
            .find(|count| count.channel == channel)
            .map(|count| count.samples)
            .unwrap_or(0)
    }
}

/// What a start request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOutcome {
    /// A new run was spawned
    Started {
        /// Id of the new run
        run_id: Uuid,
    },
    /// A run was still active; it was stopped and nothing new was spawned
    StoppedInPlace {
        /// Id of the run that was stopped
        run_id: Uuid,
    },
}

impl StartOutcome {
    /// Id of the run this outcome refers to.
    pub fn run_id(&self) -> Uuid {
        match self {
            StartOutcome::Started { run_id } | StartOutcome::StoppedInPlace { run_id } => *run_id,
        }
    }
}
