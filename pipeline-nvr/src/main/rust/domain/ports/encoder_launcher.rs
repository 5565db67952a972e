use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::errors::Result;
use crate::domain::value_objects::EncoderCommand;

pub type EncoderInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type EncoderOutput = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Running external encoder
#[async_trait]
pub trait EncoderProcess: Send {
    /// Standard input, used for the graceful quit command
    fn take_stdin(&mut self) -> Option<EncoderInput>;

    /// Diagnostic output stream
    fn take_stderr(&mut self) -> Option<EncoderOutput>;

    async fn wait(&mut self) -> io::Result<ProcessExit>;

    fn start_kill(&mut self) -> io::Result<()>;
}

/// Port for spawning the external encoder
pub trait EncoderLauncher: Send + Sync {
    fn spawn(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>>;
}
