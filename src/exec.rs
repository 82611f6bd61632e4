//! Synchronous command execution
//!
//! Every subprocess this tool spawns (`ip`, `ovs-vsctl`, `ovsdb-client`) goes
//! through [`CommandRunner`], so backends can be exercised without spawning
//! processes.

use crate::error::{Error, Result};
use std::process::Command;
use tracing::debug;

/// Captured result of one command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (None if killed by a signal)
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into `Error::CommandFailed`
    pub fn check(self, program: &str, args: &[String]) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        let status = self
            .exit_code
            .map(|c| format!("exit status {}", c))
            .unwrap_or_else(|| "terminated by signal".to_string());
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        };

        Err(Error::CommandFailed {
            command: render(program, args),
            message,
        })
    }
}

/// Narrow capability for running a program to completion
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands on the host with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(command = %render(program, args), "exec");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: render(program, args),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Render a command line for diagnostics
pub fn render(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}
