use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::accounts::ServiceIdentity;
use crate::error::CommandError;

/// How a tool's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Streams {
    /// Capture stdout/stderr; stderr is reported on failure.
    Capture,
    /// Pass through to the container log. Used for server processes that
    /// would otherwise hold the pipe open.
    Inherit,
}

/// Builder for a single external tool invocation.
pub(crate) struct Tool {
    program: String,
    command: Command,
    stdin: Option<String>,
    streams: Streams,
}

impl Tool {
    pub(crate) fn new(program: &str) -> Self {
        let mut command = Command::new(program);
        command.stdin(Stdio::null());
        Self {
            program: program.to_string(),
            command,
            stdin: None,
            streams: Streams::Capture,
        }
    }

    pub(crate) fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.command.args(args);
        self
    }

    pub(crate) fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env(key, value);
        self
    }

    pub(crate) fn run_as(mut self, identity: Option<ServiceIdentity>) -> Self {
        if let Some(identity) = identity {
            self.command.uid(identity.uid).gid(identity.gid);
        }
        self
    }

    pub(crate) fn stdin(mut self, script: impl Into<String>) -> Self {
        self.stdin = Some(script.into());
        self
    }

    pub(crate) fn streams(mut self, streams: Streams) -> Self {
        self.streams = streams;
        self
    }

    /// Spawns without waiting. Streams are inherited.
    pub(crate) fn spawn(mut self) -> Result<tokio::process::Child, CommandError> {
        self.command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        debug!(program = %self.program, "spawning background process");
        self.command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program,
            source,
        })
    }

    /// Runs to completion; non-zero exit is an error. Returns captured stdout.
    pub(crate) async fn output(mut self) -> Result<String, CommandError> {
        if self.stdin.is_some() {
            self.command.stdin(Stdio::piped());
        }
        match self.streams {
            Streams::Capture => {
                self.command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            Streams::Inherit => {
                self.command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        debug!(program = %self.program, "running tool");
        let mut child = self.command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(script) = self.stdin.take() {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(script.as_bytes())
                    .await
                    .map_err(|source| CommandError::Stdin {
                        program: self.program.clone(),
                        source,
                    })?;
                // Dropping the pipe sends EOF.
                drop(pipe);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        check_status(&self.program, output.status, &output.stderr)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn check_status(program: &str, status: ExitStatus, stderr: &[u8]) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    Err(CommandError::Exit {
        program: program.to_string(),
        code: status.code(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    })
}
