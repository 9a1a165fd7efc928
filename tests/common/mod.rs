//! Shared fixtures for integration tests.

#![allow(dead_code)]

use motor_tuner::experiment::{Channel, ResyncPolicy, RunReport, RunRequest, TaskSupervisor};
use motor_tuner::hardware::mock::MockActuator;
use motor_tuner::hardware::{ControlMode, DeviceId, PidGains, SessionCell};
use motor_tuner::render::RecordingFactory;
use std::sync::Arc;
use std::time::Duration;

pub const DRIVE: DeviceId = DeviceId(100);

/// Supervisor over `bus` with recording renderers and a 1s resync poll.
pub fn supervisor(bus: &Arc<MockActuator>) -> (TaskSupervisor, RecordingFactory) {
    let factory = RecordingFactory::new();
    let supervisor = TaskSupervisor::new(SessionCell::new(bus.clone()))
        .with_resync(ResyncPolicy {
            poll_interval: Duration::from_secs(1),
            max_attempts: None,
        })
        .with_renderers(Arc::new(factory.clone()), Duration::from_millis(50));
    (supervisor, factory)
}

/// Velocity step to `setpoint` over `secs` seconds with default limits,
/// acquiring velocity and the set-point.
pub fn velocity_request(setpoint: f64, secs: u64) -> RunRequest {
    RunRequest::new(ControlMode::Velocity, setpoint, Duration::from_secs(secs))
        .with_gains(PidGains::new(0.1, 0.2, 0.0, 1.0))
        .with_torque_limit(1.8)
        .with_profile_velocity(300.0)
        .with_channel(Channel::Velocity)
}

/// Tick the supervisor until it hands back a finished run.
pub async fn wait_finished(supervisor: &mut TaskSupervisor) -> RunReport {
    loop {
        if let Some(report) = supervisor.tick().await.unwrap().finished {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
