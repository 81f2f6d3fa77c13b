//! Subprocess execution behind a swappable seam.
//!
//! Every external tool the agent drives (the interpreter, pip, the
//! validator) goes through [`CommandRunner`], so tests can key fake
//! implementations on the argv they receive.

use std::path::Path;
use std::process::Command;

use crate::AgentResult;
use crate::Context as _;

/// Captured output of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run a command line to completion, capturing both streams.
pub trait CommandRunner {
    fn run(&self, argv: &[String], cwd: Option<&Path>) -> AgentResult<ToolOutput>;
}

/// Runner that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String], cwd: Option<&Path>) -> AgentResult<ToolOutput> {
        let (program, args) = argv.split_first().context("empty command line")?;
        log::debug!("running `{}` in {:?}", argv.join(" "), cwd.unwrap_or(Path::new(".")));

        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .with_context(|| format!("failed to spawn `{program}`"))?;

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // A signal death has no code; fold it into the failure space.
            code: output.status.code().unwrap_or(-1),
        })
    }
}
