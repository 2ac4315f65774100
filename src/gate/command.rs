//! Runs a checkpoint's external validation command with a bounded timeout.

use crate::manifest::ValidationCommand;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Passed,
    Failed { code: Option<i32>, stderr: String },
    TimedOut { after_secs: u64 },
    SpawnFailed(String),
}

impl CommandOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CommandOutcome::Passed)
    }

    pub fn describe(&self) -> String {
        match self {
            CommandOutcome::Passed => "passed".to_string(),
            CommandOutcome::Failed { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("exited with {}", code)
                } else {
                    format!("exited with {}: {}", code, last_line(stderr))
                }
            }
            CommandOutcome::TimedOut { after_secs } => format!("timed out after {}s", after_secs),
            CommandOutcome::SpawnFailed(e) => format!("could not start: {}", e),
        }
    }
}

/// Runs `command` in `root`. The library API is synchronous, so this drives a
/// single-threaded runtime for the duration of the call.
pub fn run_validation(root: &Path, command: &ValidationCommand) -> CommandOutcome {
    let Some((program, args)) = command.command.split_first() else {
        return CommandOutcome::SpawnFailed("empty command".to_string());
    };
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return CommandOutcome::SpawnFailed(e.to_string()),
    };

    let timeout = Duration::from_secs(command.timeout_secs);
    tracing::debug!(program = %program, timeout_secs = command.timeout_secs, "running validation command");
    runtime.block_on(async {
        let child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(timeout, child).await {
            Err(_) => CommandOutcome::TimedOut {
                after_secs: command.timeout_secs,
            },
            Ok(Err(e)) => CommandOutcome::SpawnFailed(e.to_string()),
            Ok(Ok(output)) if output.status.success() => CommandOutcome::Passed,
            Ok(Ok(output)) => CommandOutcome::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
        }
    })
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text)
}
