//! CLI Entry Point for motor-tuner
//!
//! Provides command-line interface for:
//! - Running one step-response test headlessly and printing its report
//! - Interactive tuning from the console (gains, limits, save to drive)
//! - Printing the effective configuration
//!
//! The binary drives the simulated actuator configured in the `[mock]`
//! section; a hardware bus driver plugs in through the same capability traits.
//!
//! # Usage
//!
//! ```bash
//! motor-tuner run --mode velocity --setpoint 50 --duration 5s --channel torque
//! motor-tuner interactive
//! motor-tuner config --config config/motor_tuner.toml
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use motor_tuner::config::{TunerConfig, DEFAULT_CONFIG_PATH};
use motor_tuner::experiment::{Channel, RunReport, RunRequest, StartOutcome, TaskSupervisor};
use motor_tuner::hardware::mock::MockActuator;
use motor_tuner::hardware::{ControlMode, PidGains, SessionCell};
use motor_tuner::logging;
use motor_tuner::render::TraceFactory;
use motor_tuner::surface::{ConsoleSurface, ControlLoop, TuningForm};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "motor-tuner")]
#[command(about = "Step-response tuning tool for PID-controlled actuators", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one test against the simulated actuator and print its report
    Run(RunArgs),

    /// Tune interactively from the console
    Interactive,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Control mode (velocity or position)
    #[arg(long, default_value = "velocity")]
    mode: ControlMode,

    /// Step set-point (rad/s or rad); defaults to the configured set-point
    #[arg(long, allow_hyphen_values = true)]
    setpoint: Option<f64>,

    /// Test duration, e.g. `5s` or `1500ms`
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    duration: Option<Duration>,

    /// Proportional gain (default: read from the drive)
    #[arg(long)]
    kp: Option<f64>,

    /// Integral gain (default: read from the drive)
    #[arg(long)]
    ki: Option<f64>,

    /// Derivative gain (default: read from the drive)
    #[arg(long)]
    kd: Option<f64>,

    /// Integral windup limit (default: read from the drive)
    #[arg(long)]
    windup: Option<f64>,

    /// Torque limit in Nm (default: read from the drive)
    #[arg(long)]
    max_torque: Option<f64>,

    /// Profile velocity limit in rad/s (default: read from the drive)
    #[arg(long)]
    profile_velocity: Option<f64>,

    /// Channel to acquire besides the set-point; repeatable (default: velocity)
    #[arg(long = "channel", value_name = "CHANNEL")]
    channels: Vec<Channel>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TunerConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    config.validate()?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Run(args) => {
            logging::init_from_config(&config)?;
            run_once(&config, args).await
        }
        Commands::Interactive => {
            logging::init_from_config(&config)?;
            run_interactive(&config).await
        }
    }
}

fn build_supervisor(config: &TunerConfig) -> Result<TaskSupervisor> {
    let mut bus = MockActuator::with_devices(&config.mock.devices())
        .with_restart_polls(config.mock.restart_polls);
    for (register, value) in config.mock.register_overrides()? {
        bus = bus.with_register(register, value);
    }

    Ok(TaskSupervisor::new(SessionCell::new(Arc::new(bus)))
        .with_timing(config.run_timing())
        .with_resync(config.resync_policy())
        .with_renderers(Arc::new(TraceFactory), config.timing.display_period))
}

async fn run_once(config: &TunerConfig, args: RunArgs) -> Result<()> {
    let mut supervisor = build_supervisor(config)?;
    supervisor.connect().await?;
    let snapshot = supervisor.on_mode_changed(args.mode).await?;

    let gains = PidGains::new(
        args.kp.unwrap_or(snapshot.gains.kp),
        args.ki.unwrap_or(snapshot.gains.ki),
        args.kd.unwrap_or(snapshot.gains.kd),
        args.windup.unwrap_or(snapshot.gains.windup),
    );
    let channels = if args.channels.is_empty() {
        vec![Channel::Velocity]
    } else {
        args.channels
    };
    let request = RunRequest::new(
        args.mode,
        args.setpoint.unwrap_or(config.defaults.setpoint),
        args.duration.unwrap_or(config.defaults.duration),
    )
    .with_gains(gains)
    .with_torque_limit(args.max_torque.unwrap_or(snapshot.max_torque))
    .with_profile_velocity(args.profile_velocity.unwrap_or(snapshot.profile_velocity))
    .with_channels(channels);

    let run_id = match supervisor.request_start(request).await? {
        StartOutcome::Started { run_id } => run_id,
        StartOutcome::StoppedInPlace { run_id } => {
            anyhow::bail!("run {} was still active and has been stopped", run_id)
        }
    };
    info!(run_id = %run_id, "Waiting for run to finish (Ctrl+C stops it)");

    let report = tokio::select! {
        report = wait_for_report(&mut supervisor, config.timing.surface_poll) => report?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted; stopping run");
            supervisor.request_stop().await?;
            supervisor
                .last_report()
                .cloned()
                .context("stopped run produced no report")?
        }
    };
    supervisor.shutdown().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn wait_for_report(supervisor: &mut TaskSupervisor, poll: Duration) -> Result<RunReport> {
    loop {
        if let Some(report) = supervisor.tick().await?.finished {
            return Ok(report);
        }
        tokio::time::sleep(poll).await;
    }
}

fn print_report(report: &RunReport) {
    println!("run        {}", report.run_id);
    println!("started    {}", report.started_at.to_rfc3339());
    println!("mode       {}", report.mode);
    println!("setpoint   {}", report.setpoint);
    println!("outcome    {:?}", report.outcome);
    println!("ticks      {}", report.ticks);
    for count in &report.channels {
        println!("  {:<14} {} samples", count.channel, count.samples);
    }
}

async fn run_interactive(config: &TunerConfig) -> Result<()> {
    let supervisor = build_supervisor(config)?;
    let form = TuningForm::new(config.defaults.setpoint, config.defaults.duration);
    let surface = ConsoleSurface::stdin(form);

    ControlLoop::new(supervisor, surface)
        .with_poll_interval(config.timing.surface_poll)
        .with_default_setpoint(config.defaults.setpoint)
        .run()
        .await?;
    Ok(())
}
