//! Transport layer: opening sessions to devices.
//!
//! The engine only talks to [`Transport`] and [`Session`]; the SSH
//! implementation in [`SshTransport`] is one way to satisfy them and tests
//! substitute a scripted one.

pub mod config;
mod scp;
mod ssh;

pub use config::{AuthMethod, ConnectionParams, HostKeyVerification, SessionMode, SshOptions};
pub use ssh::{SshSession, SshTransport};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::Answer;
use crate::error::Result;

/// Output of one command as produced by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Standard output (or the shell output between echo and prompt).
    pub output: String,

    /// Standard error, empty in shell mode.
    pub error: String,

    /// Exit status if the device reported one.
    pub exit_status: Option<u32>,
}

impl RawOutput {
    /// Output with no error stream.
    pub fn stdout(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }
}

/// Factory for device sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate.
    async fn open(&self, params: &ConnectionParams, mode: &SessionMode) -> Result<Box<dyn Session>>;
}

/// One authenticated connection to one device.
#[async_trait]
pub trait Session: Send {
    /// Run a command and collect its output.
    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawOutput>;

    /// Run a command that may stop at questions, replying with `answers`.
    ///
    /// Transports without interactive support fall back to [`Session::execute`].
    async fn execute_interactive(
        &mut self,
        command: &str,
        answers: &[Answer],
        timeout: Duration,
    ) -> Result<RawOutput> {
        let _ = answers;
        self.execute(command, timeout).await
    }

    /// Copy a local file to the device.
    async fn transfer_file(&mut self, local: &Path, remote: &str, timeout: Duration) -> Result<()>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
