//! Line-oriented console surface.
//!
//! Stdin is read on a dedicated thread and handed over a channel, so polling
//! never blocks the control loop. End of input counts as closing the window.
//!
//! ```text
//! run | stop | save | quit | help | form
//! mode <velocity|position>
//! set <kp|ki|kd|windup|max-torque|profile-velocity|setpoint|duration> <value>
//! show <channel> <on|off>
//! ```

use std::io::BufRead;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tracing::debug;

use super::{ControlSurface, Intent, Notice, TuningForm};
use crate::experiment::Channel;
use crate::hardware::{ControlMode, DeviceSnapshot};

const HELP: &str = "\
commands:
  run                      start a test (stops the active one)
  stop                     stop and disable the drive
  save                     store gains/limits in the drive
  mode <velocity|position> select control mode
  set <field> <value>      kp, ki, kd, windup, max-torque, profile-velocity, setpoint, duration
  show <channel> <on|off>  velocity, position, torque, temperature, max-torque, max-velocity
  form                     print current values
  quit                     disable the drive and exit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a test
    Run,
    /// Stop the test
    Stop,
    /// Save gains/limits
    Save,
    /// Select control mode
    Mode(ControlMode),
    /// Update a form field
    Set(String, String),
    /// Toggle a channel checkbox
    Show(Channel, bool),
    /// Print the form
    Form,
    /// Print usage
    Help,
    /// Exit
    Quit,
}

/// Parse one input line; blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        [] => return Ok(None),
        ["run"] => Command::Run,
        ["stop"] => Command::Stop,
        ["save"] => Command::Save,
        ["quit"] | ["exit"] => Command::Quit,
        ["help"] | ["?"] => Command::Help,
        ["form"] => Command::Form,
        ["mode", mode] => Command::Mode(mode.parse()?),
        ["set", field, value] => Command::Set(field.to_string(), value.to_string()),
        ["show", channel, state] => {
            let channel: Channel = channel.parse()?;
            let shown = match *state {
                "on" | "yes" | "true" => true,
                "off" | "no" | "false" => false,
                other => return Err(format!("Expected on/off, got '{}'", other)),
            };
            Command::Show(channel, shown)
        }
        _ => return Err(format!("Unrecognized command '{}' (try 'help')", line.trim())),
    };
    Ok(Some(command))
}

/// Surface driven by commands typed on stdin.
pub struct ConsoleSurface {
    form: TuningForm,
    lines: UnboundedReceiver<String>,
    closed: bool,
}

impl ConsoleSurface {
    /// Surface reading stdin on a background thread.
    pub fn stdin(form: TuningForm) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("console-input".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("Console input closed");
            })
            .map(|_| ())
            .unwrap_or_else(|err| debug!(error = %err, "Console input thread not started"));
        println!("{HELP}");
        Self::from_lines(form, rx)
    }

    /// Surface fed from an arbitrary line channel.
    pub fn from_lines(form: TuningForm, lines: UnboundedReceiver<String>) -> Self {
        Self {
            form,
            lines,
            closed: false,
        }
    }

    /// Current form values.
    pub fn form(&self) -> &TuningForm {
        &self.form
    }

    fn apply(&mut self, command: Command) -> Option<Intent> {
        match command {
            Command::Run => Some(Intent::Start(self.form.request())),
            Command::Stop => Some(Intent::Stop),
            Command::Save => Some(Intent::Save(self.form.request())),
            Command::Quit => Some(Intent::WindowClosed),
            Command::Mode(mode) => {
                self.form.mode = mode;
                Some(Intent::ModeChanged(mode))
            }
            Command::Set(field, value) => {
                match self.form.set_field(&field, &value) {
                    Ok(()) => println!("{} = {}", field, value),
                    Err(message) => println!("error: {}", message),
                }
                None
            }
            Command::Show(channel, shown) => {
                self.form.set_channel(channel, shown);
                None
            }
            Command::Form => {
                println!("{}", self.form);
                None
            }
            Command::Help => {
                println!("{HELP}");
                None
            }
        }
    }
}

impl ControlSurface for ConsoleSurface {
    fn poll_intents(&mut self) -> Vec<Intent> {
        let mut intents = Vec::new();
        loop {
            match self.lines.try_recv() {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(command)) => intents.extend(self.apply(command)),
                    Ok(None) => {}
                    Err(message) => println!("error: {}", message),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        self.closed = true;
                        intents.push(Intent::WindowClosed);
                    }
                    break;
                }
            }
        }
        intents
    }

    fn show_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        self.form.apply_snapshot(snapshot);
        println!("{}", self.form);
    }

    fn suggest_setpoint(&mut self, setpoint: f64) {
        self.form.setpoint = setpoint;
    }

    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::RunStarted(id) => println!("run {} started", id),
            Notice::RunStoppedInPlace(id) => println!("run {} stopped", id),
            Notice::Stopped => println!("stopped, drive disabled"),
            Notice::RunFinished(report) => println!(
                "run {} finished: {:?}, {} ticks",
                report.run_id, report.outcome, report.ticks
            ),
            Notice::Saved(_) => println!("configuration saved, drive back online"),
            Notice::RefreshDeferred(mode) => {
                println!("{} registers will be shown when the run ends", mode)
            }
            Notice::Error(message) => println!("error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("run"), Ok(Some(Command::Run)));
        assert_eq!(
            parse_command("mode position"),
            Ok(Some(Command::Mode(ControlMode::Position)))
        );
        assert_eq!(
            parse_command("set kp 0.25"),
            Ok(Some(Command::Set("kp".into(), "0.25".into())))
        );
        assert_eq!(
            parse_command("show torque on"),
            Ok(Some(Command::Show(Channel::Torque, true)))
        );
        assert!(parse_command("show torque maybe").is_err());
        assert!(parse_command("mode torque").is_err());
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn lines_become_intents() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut surface = ConsoleSurface::from_lines(TuningForm::default(), rx);

        tx.send("set setpoint 12".into()).unwrap();
        tx.send("show position on".into()).unwrap();
        tx.send("run".into()).unwrap();
        tx.send("mode position".into()).unwrap();

        let intents = surface.poll_intents();
        assert_eq!(intents.len(), 2);
        match &intents[0] {
            Intent::Start(request) => {
                assert_eq!(request.setpoint(), 12.0);
                assert!(request.acquires(Channel::Position));
                assert!(request.acquires(Channel::Velocity));
            }
            other => panic!("unexpected intent {other:?}"),
        }
        assert_eq!(intents[1], Intent::ModeChanged(ControlMode::Position));
        assert!(surface.poll_intents().is_empty());
    }

    #[test]
    fn end_of_input_closes_window_once() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut surface = ConsoleSurface::from_lines(TuningForm::default(), rx);
        drop(tx);
        assert_eq!(surface.poll_intents(), vec![Intent::WindowClosed]);
        assert!(surface.poll_intents().is_empty());
    }
}
