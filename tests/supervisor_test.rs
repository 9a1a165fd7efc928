//! Task supervisor: start, stop-in-place, replacement and deferred refresh.

mod common;

use common::{supervisor, velocity_request, wait_finished, DRIVE};
use motor_tuner::experiment::{RunOutcome, RunPhase, RunRequest, StartOutcome, TaskSupervisor};
use motor_tuner::hardware::mock::{MockActuator, MockEvent};
use motor_tuner::hardware::{ControlMode, DeviceId, Register, SessionCell};
use motor_tuner::TunerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

async fn connected() -> (Arc<MockActuator>, TaskSupervisor, motor_tuner::render::RecordingFactory) {
    let bus = Arc::new(MockActuator::new());
    let (mut supervisor, factory) = supervisor(&bus);
    supervisor.connect().await.unwrap();
    (bus, supervisor, factory)
}

#[tokio::test(start_paused = true)]
async fn connect_fails_without_drive() {
    let bus = Arc::new(MockActuator::with_devices(&[]));
    let mut supervisor = TaskSupervisor::new(SessionCell::new(bus.clone()));

    let err = supervisor.connect().await.unwrap_err();
    assert!(matches!(err, TunerError::DeviceUnreachable(_)));
    assert!(supervisor.devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_runs_to_completion_with_requested_parameters() {
    let (bus, mut supervisor, factory) = connected().await;

    let outcome = supervisor.request_start(velocity_request(20.0, 2)).await.unwrap();
    let StartOutcome::Started { run_id } = outcome else {
        panic!("expected a new run, got {outcome:?}");
    };
    let info = supervisor.current_run().unwrap();
    assert_eq!(info.id, run_id);
    assert_eq!(info.request.setpoint(), 20.0);

    let report = wait_finished(&mut supervisor).await;
    assert_eq!(report.run_id, run_id);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.samples("velocity"), 200);
    assert_eq!(supervisor.current_run().unwrap().phase, RunPhase::Closed);
    assert_eq!(supervisor.last_report(), Some(&report));

    assert_eq!(
        bus.count(|e| *e == MockEvent::SetGains(DRIVE, ControlMode::Velocity, velocity_request(20.0, 2).gains())),
        1
    );
    assert_eq!(bus.disable_count(), 1);

    // The renderer saw every sample and was told the run finished.
    let renderer = factory.for_run(run_id).unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(renderer.samples("velocity").len(), 200);
    assert!(renderer.is_finished());
}

#[tokio::test(start_paused = true)]
async fn start_while_active_stops_in_place() {
    let (bus, mut supervisor, factory) = connected().await;
    let first = supervisor
        .request_start(velocity_request(50.0, 5))
        .await
        .unwrap()
        .run_id();
    sleep(Duration::from_secs(1)).await;

    let outcome = supervisor.request_start(velocity_request(10.0, 5)).await.unwrap();

    assert_eq!(outcome, StartOutcome::StoppedInPlace { run_id: first });
    let info = supervisor.current_run().unwrap();
    assert_eq!(info.id, first);
    assert_eq!(info.phase, RunPhase::Cancelled);
    assert_eq!(factory.renderers().len(), 1);
    assert_eq!(bus.disable_count(), 1);
    assert!(!bus.is_enabled(DRIVE));
    assert_eq!(
        supervisor.last_report().map(|r| r.outcome.clone()),
        Some(RunOutcome::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn start_with_invalid_request_still_stops_active_run() {
    let (bus, mut supervisor, _factory) = connected().await;
    let first = supervisor
        .request_start(velocity_request(50.0, 5))
        .await
        .unwrap()
        .run_id();
    sleep(Duration::from_secs(1)).await;

    let outcome = supervisor
        .request_start(RunRequest::new(ControlMode::Velocity, 50.0, Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(outcome, StartOutcome::StoppedInPlace { run_id: first });
    assert_eq!(supervisor.current_run().unwrap().phase, RunPhase::Cancelled);
    assert!(!bus.is_enabled(DRIVE));
    assert_eq!(bus.disable_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_collected_by_stop_is_still_reported_by_tick() {
    let (_bus, mut supervisor, _factory) = connected().await;
    let run_id = supervisor
        .request_start(velocity_request(50.0, 1))
        .await
        .unwrap()
        .run_id();
    // Finishes without anyone ticking.
    sleep(Duration::from_secs(3)).await;

    supervisor.request_stop().await.unwrap();
    let events = supervisor.tick().await.unwrap();

    let report = events.finished.expect("finished run handed out by tick");
    assert_eq!(report.run_id, run_id);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(supervisor.tick().await.unwrap().finished.is_none());
}

#[tokio::test(start_paused = true)]
async fn stopped_in_place_run_is_reported_by_tick() {
    let (_bus, mut supervisor, _factory) = connected().await;
    let first = supervisor
        .request_start(velocity_request(50.0, 5))
        .await
        .unwrap()
        .run_id();
    sleep(Duration::from_millis(500)).await;
    supervisor.request_start(velocity_request(50.0, 5)).await.unwrap();

    let report = supervisor.tick().await.unwrap().finished.unwrap();

    assert_eq!(report.run_id, first);
    assert_eq!(report.outcome, RunOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn start_after_terminal_run_replaces_it() {
    let (bus, mut supervisor, factory) = connected().await;
    let first = supervisor
        .request_start(velocity_request(50.0, 1))
        .await
        .unwrap()
        .run_id();
    wait_finished(&mut supervisor).await;

    let second = supervisor.request_start(velocity_request(30.0, 1)).await.unwrap();

    let StartOutcome::Started { run_id } = second else {
        panic!("expected a new run, got {second:?}");
    };
    assert_ne!(run_id, first);
    assert_eq!(supervisor.current_run().unwrap().id, run_id);
    assert!(factory.for_run(first).unwrap().is_closed());
    assert_eq!(factory.renderers().len(), 2);

    wait_finished(&mut supervisor).await;
    assert_eq!(bus.disable_count(), 2);
    assert_eq!(bus.link_overlaps(), 0);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_active_run() {
    let (bus, mut supervisor, _factory) = connected().await;

    let mut started = 0;
    for i in 0..6 {
        match supervisor.request_start(velocity_request(i as f64, 3)).await.unwrap() {
            StartOutcome::Started { .. } => started += 1,
            StartOutcome::StoppedInPlace { .. } => {}
        }
        sleep(Duration::from_millis(300)).await;
        // The bus link is never opened twice.
        assert_eq!(bus.link_overlaps(), 0);
    }

    // Starts alternate between spawning and stopping.
    assert_eq!(started, 3);
    assert_eq!(bus.count(|e| matches!(e, MockEvent::Begin)), 3);
    assert_eq!(bus.disable_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_primary_drive_vanishes() {
    let (bus, mut supervisor, factory) = connected().await;
    bus.set_reachable(false);

    let err = supervisor
        .request_start(velocity_request(50.0, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, TunerError::DeviceUnreachable(_)));
    assert!(supervisor.current_run().is_none());
    assert!(factory.renderers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_request_is_rejected_before_touching_the_drive() {
    let (bus, mut supervisor, _factory) = connected().await;
    bus.clear_events();

    let err = supervisor
        .request_start(velocity_request(50.0, 1).with_torque_limit(-1.0))
        .await
        .unwrap_err();

    assert!(matches!(err, TunerError::InvalidRequest(_)));
    assert!(bus.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_without_run_disables_and_closes_link() {
    let (bus, mut supervisor, _factory) = connected().await;

    supervisor.request_stop().await.unwrap();
    supervisor.request_stop().await.unwrap();

    assert_eq!(bus.disable_count(), 2);
    assert!(!bus.link_open());
    assert!(bus.events().ends_with(&[MockEvent::Enable(DRIVE, false), MockEvent::End]));
}

#[tokio::test(start_paused = true)]
async fn stop_during_run_disables_once() {
    let (bus, mut supervisor, _factory) = connected().await;
    supervisor.request_start(velocity_request(50.0, 5)).await.unwrap();
    sleep(Duration::from_secs(2)).await;

    supervisor.request_stop().await.unwrap();

    assert_eq!(supervisor.current_run().unwrap().phase, RunPhase::Cancelled);
    assert_eq!(bus.disable_count(), 1);
    assert!(!bus.link_open());

    // Stopping again after the run is terminal disables the idle drive.
    supervisor.request_stop().await.unwrap();
    assert_eq!(bus.disable_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn mode_change_during_run_is_deferred() {
    let (_bus, mut supervisor, _factory) = connected().await;
    supervisor.request_start(velocity_request(50.0, 2)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let err = supervisor
        .on_mode_changed(ControlMode::Position)
        .await
        .unwrap_err();
    assert!(matches!(err, TunerError::SessionBusy));
    assert_eq!(supervisor.current_run().unwrap().phase, RunPhase::Acquiring);

    let mut refreshed = None;
    while refreshed.is_none() {
        let events = supervisor.tick().await.unwrap();
        if let Some(report) = &events.finished {
            assert_eq!(report.outcome, RunOutcome::Completed);
        }
        refreshed = events.snapshot;
        sleep(Duration::from_millis(100)).await;
    }

    let snapshot = refreshed.unwrap();
    assert_eq!(snapshot.mode, ControlMode::Position);
    assert_eq!(snapshot.gains.kp, 20.0);
    assert_eq!(supervisor.snapshot(), Some(snapshot));
}

#[tokio::test(start_paused = true)]
async fn mode_change_when_idle_reads_mode_registers() {
    let bus = Arc::new(MockActuator::new().with_register(Register::VelPidKp, 0.35));
    let (mut supervisor, _factory) = supervisor(&bus);
    supervisor.connect().await.unwrap();
    bus.clear_events();

    let snapshot = supervisor.on_mode_changed(ControlMode::Velocity).await.unwrap();

    assert_eq!(snapshot.gains.kp, 0.35);
    assert_eq!(snapshot.max_torque, 1.8);
    assert_eq!(bus.count(|e| matches!(e, MockEvent::ReadRegister(..))), 6);
    assert!(bus
        .events()
        .iter()
        .all(|e| !matches!(e, MockEvent::ReadRegister(_, r) if r.mode() == Some(ControlMode::Position))));
}

#[tokio::test(start_paused = true)]
async fn shutdown_disables_every_drive_once() {
    let bus = Arc::new(MockActuator::with_devices(&[DeviceId(100), DeviceId(101)]));
    let (mut supervisor, factory) = supervisor(&bus);
    supervisor.connect().await.unwrap();
    let run_id = supervisor
        .request_start(velocity_request(50.0, 5))
        .await
        .unwrap()
        .run_id();
    sleep(Duration::from_millis(700)).await;

    supervisor.shutdown().await.unwrap();

    assert_eq!(bus.count(|e| *e == MockEvent::Enable(DeviceId(100), false)), 1);
    assert_eq!(bus.count(|e| *e == MockEvent::Enable(DeviceId(101), false)), 1);
    assert!(!bus.link_open());
    assert!(factory.for_run(run_id).unwrap().is_closed());
}
