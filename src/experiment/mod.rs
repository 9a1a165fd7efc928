//! Step-response experiments.
//!
//! - `request`: immutable run parameters and the channels a run acquires
//! - `state`: run phases, outcomes and reports
//! - `run_loop`: the bounded acquisition/control task of one run
//! - `supervisor`: start/replace/cancel of the single in-flight run and the
//!   post-save resynchronization protocol
//!
//! # Architecture
//!
//! ```text
//! ControlLoop ──intents──▶ TaskSupervisor ──spawn/cancel──▶ RunLoop ──▶ DeviceSession
//!                                 │                            │
//!                                 └──── RenderPump ◀── SampleStream
//! ```

pub mod request;
pub mod run_loop;
pub mod state;
pub mod supervisor;

pub use request::{Channel, RunRequest, MAX_TEST_DURATION};
pub use run_loop::{setpoint_stage, step_applied, RunLoop, RunTiming, RAMP_FRACTION};
pub use state::{ChannelCount, RunOutcome, RunPhase, RunReport, StartOutcome};
pub use supervisor::{ResyncPolicy, RunInfo, TaskSupervisor, TickEvents};
