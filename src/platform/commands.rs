//! Shell-outs with explicit deadlines.

use std::time::{Duration, Instant};

use tokio::process::Command;

/// Default deadline for maintenance shell-outs.
pub const DEFAULT_COMMAND_DEADLINE: Duration = Duration::from_secs(15);
/// Network stack resets are slower.
pub const NETWORK_RESET_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failed(Option<i32>),
    TimedOut,
    /// The program could not be started at all.
    SpawnFailed(String),
    /// Not attempted: the platform or privilege level lacks the capability.
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub program: String,
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn succeeded(program: &str) -> Self {
        Self::with_status(program, CommandStatus::Success)
    }

    pub fn unsupported(program: &str, reason: &str) -> Self {
        Self::with_status(program, CommandStatus::Unsupported(reason.to_string()))
    }

    pub fn with_status(program: &str, status: CommandStatus) -> Self {
        Self {
            program: program.to_string(),
            status,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }

    /// One-line summary suitable for a repair record.
    pub fn summary(&self) -> String {
        match &self.status {
            CommandStatus::Success => format!("{} completed", self.program),
            CommandStatus::Failed(code) => {
                let detail = self.stderr.lines().next().unwrap_or("").trim();
                let line = match code {
                    Some(code) => format!("{} exited with {} {}", self.program, code, detail),
                    None => format!("{} terminated by signal {}", self.program, detail),
                };
                line.trim_end().to_string()
            }
            CommandStatus::TimedOut => format!(
                "{} timed out after {:.1}s",
                self.program,
                self.elapsed.as_secs_f64()
            ),
            CommandStatus::SpawnFailed(err) => format!("{} could not start: {}", self.program, err),
            CommandStatus::Unsupported(reason) => format!("{} skipped: {}", self.program, reason),
        }
    }
}

/// Run `program args…`, killing it if it has not finished within `deadline`.
pub async fn run_with_deadline(program: &str, args: &[&str], deadline: Duration) -> CommandOutcome {
    let start = Instant::now();
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    #[cfg(windows)]
    {
        command.creation_flags(0x08000000); // CREATE_NO_WINDOW
    }

    log::debug!("Running {} {:?} (deadline {:?})", program, args, deadline);

    let result = tokio::time::timeout(deadline, command.output()).await;

    let (status, stdout, stderr) = match result {
        Ok(Ok(output)) => {
            let status = if output.status.success() {
                CommandStatus::Success
            } else {
                CommandStatus::Failed(output.status.code())
            };
            (
                status,
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
        }
        Ok(Err(e)) => (CommandStatus::SpawnFailed(e.to_string()), String::new(), String::new()),
        Err(_) => {
            log::warn!("{} exceeded its {:?} deadline, killed", program, deadline);
            (CommandStatus::TimedOut, String::new(), String::new())
        }
    };

    CommandOutcome {
        program: program.to_string(),
        status,
        stdout,
        stderr,
        elapsed: start.elapsed(),
    }
}

/// Run a sequence of commands, stopping at the first failure.
pub async fn run_sequence(steps: &[(&str, &[&str])], deadline: Duration) -> Vec<CommandOutcome> {
    let mut outcomes = Vec::with_capacity(steps.len());
    for (program, args) in steps {
        let outcome = run_with_deadline(program, args, deadline).await;
        let ok = outcome.success();
        outcomes.push(outcome);
        if !ok {
            break;
        }
    }
    outcomes
}
