use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{EncoderInput, EncoderLauncher, EncoderOutput, EncoderProcess, ProcessExit};
use crate::domain::value_objects::EncoderCommand;

/// Spawns the encoder as a child process with piped stdin and stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn spawn(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>> {
        let child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::Process(format!(
                    "failed to spawn {}: {}",
                    command.program().display(),
                    e
                ))
            })?;
        debug!(pid = ?child.id(), "Encoder spawned");
        Ok(Box::new(FfmpegProcess { child }))
    }
}

pub struct FfmpegProcess {
    child: Child,
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn take_stdin(&mut self) -> Option<EncoderInput> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as EncoderInput)
    }

    fn take_stderr(&mut self) -> Option<EncoderOutput> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as EncoderOutput)
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}
