//! # Motor Tuner Core Library
//!
//! Step-response tuning for PID-controlled actuators: a task supervisor runs
//! one bounded control-and-telemetry test at a time next to a long-lived
//! interactive control loop, streams live samples to a renderer without
//! blocking the surface, and resynchronizes with the drive after a
//! configuration save restarts it.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: async capability traits of the device session, the
//!   register map, lease-based session ownership and a simulated actuator.
//! - **`data`**: the per-run, multi-channel `SampleStream`.
//! - **`experiment`**: run requests, the `RunLoop` state machine and the
//!   `TaskSupervisor`.
//! - **`render`**: the `Renderer` contract, the render pump and reference
//!   renderers.
//! - **`surface`**: control surfaces, the tuning form and the `ControlLoop`.
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the `TunerError` type.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod render;
pub mod surface;

pub use error::{AppResult, TunerError};
