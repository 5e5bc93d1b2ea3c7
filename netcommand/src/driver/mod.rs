//! Vendor drivers.
//!
//! A [`Driver`] pairs a [`DriverDefinition`] (capabilities, session mode,
//! failure and terminal patterns, image conventions) with a
//! [`VendorBehavior`] implementing the vendor's multi-step procedures.
//! Drivers operate on an already opened [`Session`] through a
//! [`DriverSession`], which applies timeouts and failure detection to
//! every command.

mod definition;
mod registry;
mod response;
pub mod vendors;

pub use definition::DriverDefinition;
pub use registry::DriverRegistry;
pub use response::Response;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use secrecy::SecretString;

use crate::channel::Answer;
use crate::config::Timeouts;
use crate::error::{DriverError, Error, Result, TransportError};
use crate::image::ImageReference;
use crate::inventory::DeviceDescriptor;
use crate::operation::Operation;
use crate::transport::{Session, SessionMode};

/// Operations a driver supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub commands: bool,
    pub upgrade: bool,
    pub upgrade_requires_manual_reload: bool,
}

impl Capabilities {
    /// Commands and version queries, no upgrades.
    pub fn commands_only() -> Self {
        Self {
            commands: true,
            ..Self::default()
        }
    }

    /// Commands and upgrades.
    pub fn with_upgrade() -> Self {
        Self {
            commands: true,
            upgrade: true,
            upgrade_requires_manual_reload: false,
        }
    }

    /// Upgrades that only stage the image and leave the reload to the operator.
    pub fn manual_reload(mut self) -> Self {
        self.upgrade_requires_manual_reload = true;
        self
    }

    /// Whether `operation` can run with these capabilities.
    pub fn allows(&self, operation: &Operation) -> bool {
        match operation {
            Operation::Commands(_) | Operation::Version => self.commands,
            Operation::Upgrade(_) => self.upgrade,
        }
    }
}

/// Result of a vendor upgrade procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The new image is running or the device is rebooting into it.
    Completed,

    /// The new image is installed and selected; a manual reload activates it.
    CompletedPendingReload,

    /// The driver has no upgrade procedure.
    Unsupported,
}

/// What a driver needs after the device came back from a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootFollowUp {
    /// Nothing more to do.
    Done,

    /// The driver started another reboot (e.g. a boot loader update).
    RebootAgain,
}

/// Vendor-specific procedures.
#[async_trait]
pub trait VendorBehavior: Send + Sync {
    /// Called after the session is opened, before the on_open commands.
    async fn on_open(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Running software version.
    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String>;

    /// Hardware platform as the device reports it, spelled the way image
    /// filenames spell it. `None` when the driver cannot tell.
    async fn platform(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let _ = cx;
        Ok(None)
    }

    /// Boot loader / firmware version, when the device has a separate one.
    async fn firmware_version(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let _ = cx;
        Ok(None)
    }

    /// Persist the running configuration.
    async fn save_config(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Install `image`.
    async fn upgrade(&self, cx: &mut DriverSession<'_>, image: &ImageReference) -> Result<UpgradeOutcome> {
        let _ = (cx, image);
        Ok(UpgradeOutcome::Unsupported)
    }

    /// Called on a fresh session after an upgrade reboot.
    async fn after_reboot(&self, cx: &mut DriverSession<'_>) -> Result<RebootFollowUp> {
        let _ = cx;
        Ok(RebootFollowUp::Done)
    }
}

/// Fallback behavior: reads nothing, upgrades nothing.
pub struct DefaultBehavior;

#[async_trait]
impl VendorBehavior for DefaultBehavior {
    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        Err(DriverError::UnsupportedOperation {
            model: cx.definition().name.clone(),
            operation: Operation::Version.name().to_string(),
        }
        .into())
    }
}

/// How a command batch ended.
#[derive(Debug, Default)]
pub struct CommandBatchOutcome {
    /// One response per command that was sent.
    pub transcript: Vec<Response>,

    /// Terminal command that ended the batch, and how many commands
    /// were left unsent after it.
    pub stopped_after: Option<(String, usize)>,

    /// Transport error that aborted the batch.
    pub error: Option<Error>,
}

/// A driver for one device model. Cheap to clone.
#[derive(Clone)]
pub struct Driver {
    definition: Arc<DriverDefinition>,
    behavior: Arc<dyn VendorBehavior>,
}

impl Driver {
    /// Create a driver from its definition.
    pub fn new(definition: DriverDefinition) -> Self {
        let behavior = definition
            .behavior
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultBehavior));
        Self {
            definition: Arc::new(definition),
            behavior,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &DriverDefinition {
        &self.definition
    }

    pub fn capabilities(&self) -> Capabilities {
        self.definition.capabilities
    }

    pub fn session_mode(&self) -> &SessionMode {
        &self.definition.session_mode
    }

    /// Fail with `UnsupportedOperation` unless the driver can run `operation`.
    pub fn ensure_supports(&self, operation: &Operation) -> Result<()> {
        if self.capabilities().allows(operation) {
            return Ok(());
        }
        Err(DriverError::UnsupportedOperation {
            model: self.name().to_string(),
            operation: operation.name().to_string(),
        }
        .into())
    }

    /// Bind this driver to an open session.
    pub fn bind<'a>(
        &'a self,
        session: &'a mut dyn Session,
        device: &'a DeviceDescriptor,
        timeouts: &'a Timeouts,
    ) -> DriverSession<'a> {
        DriverSession {
            session,
            definition: &self.definition,
            device,
            timeouts,
        }
    }

    /// Prepare a freshly opened session.
    pub async fn open(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        self.behavior.on_open(cx).await?;
        for command in &self.definition.on_open_commands {
            cx.run(command).await?;
        }
        Ok(())
    }

    /// Send `commands` in order.
    ///
    /// A failing command is recorded and the batch continues. A terminal
    /// command ends the batch; if the device drops the connection while
    /// running it, that is the expected outcome. Any other transport error
    /// aborts the batch.
    pub async fn run_commands(&self, cx: &mut DriverSession<'_>, commands: &[String]) -> CommandBatchOutcome {
        let mut outcome = CommandBatchOutcome::default();

        for (index, command) in commands.iter().enumerate() {
            let terminal = self.definition.is_terminal_command(command);
            let started = Instant::now();

            match cx.send_command(command).await {
                Ok(response) => outcome.transcript.push(response),
                Err(e) if terminal && e.is_disconnect() => {
                    debug!("{}: connection dropped after '{}'", cx.host(), command);
                    outcome
                        .transcript
                        .push(Response::new(command.as_str(), "", started.elapsed()));
                }
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            }

            if terminal {
                let remaining = commands.len() - index - 1;
                info!(
                    "{}: '{}' ends the batch, {} command(s) not sent",
                    cx.host(),
                    command,
                    remaining
                );
                outcome.stopped_after = Some((command.clone(), remaining));
                break;
            }
        }

        outcome
    }

    pub async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        self.behavior.software_version(cx).await
    }

    pub async fn platform(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        self.behavior.platform(cx).await
    }

    pub async fn firmware_version(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        self.behavior.firmware_version(cx).await
    }

    pub async fn save_config(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        self.behavior.save_config(cx).await
    }

    pub async fn upgrade(&self, cx: &mut DriverSession<'_>, image: &ImageReference) -> Result<UpgradeOutcome> {
        self.behavior.upgrade(cx, image).await
    }

    pub async fn after_reboot(&self, cx: &mut DriverSession<'_>) -> Result<RebootFollowUp> {
        self.behavior.after_reboot(cx).await
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("definition", &self.definition)
            .finish()
    }
}

/// A driver bound to one open session.
pub struct DriverSession<'a> {
    session: &'a mut dyn Session,
    definition: &'a DriverDefinition,
    device: &'a DeviceDescriptor,
    timeouts: &'a Timeouts,
}

impl<'a> DriverSession<'a> {
    pub fn host(&self) -> &str {
        &self.device.hostname
    }

    pub fn device(&self) -> &DeviceDescriptor {
        self.device
    }

    pub fn definition(&self) -> &DriverDefinition {
        self.definition
    }

    pub fn timeouts(&self) -> &Timeouts {
        self.timeouts
    }

    pub fn enable_password(&self) -> Option<&SecretString> {
        self.device.enable_password.as_ref()
    }

    /// Send a command with the default command timeout.
    pub async fn send_command(&mut self, command: &str) -> Result<Response> {
        let timeout = self.timeouts.command;
        self.send_command_with(command, &[], timeout).await
    }

    /// Send a command, answering questions with `answers`.
    ///
    /// Output on the error stream or a line matching one of the driver's
    /// failure patterns marks the response as failed; transport problems
    /// are returned as errors.
    pub async fn send_command_with(
        &mut self,
        command: &str,
        answers: &[Answer],
        timeout: Duration,
    ) -> Result<Response> {
        debug!("{}: sending '{}'", self.device.hostname, command);
        let started = Instant::now();

        let execution = async {
            if answers.is_empty() {
                self.session.execute(command, timeout).await
            } else {
                self.session.execute_interactive(command, answers, timeout).await
            }
        };
        let raw = tokio::time::timeout(timeout, execution)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        let elapsed = started.elapsed();

        let stderr = raw.error.trim();
        if !stderr.is_empty() {
            debug!("{}: '{}' wrote to stderr: {}", self.device.hostname, command, stderr);
            return Ok(Response::failed(command, raw.output.clone(), elapsed, stderr));
        }

        if let Some(line) = self.definition.detect_failure(&raw.output) {
            debug!("{}: '{}' failed: {}", self.device.hostname, command, line);
            return Ok(Response::failed(command, raw.output, elapsed, line));
        }

        Ok(Response::new(command, raw.output, elapsed))
    }

    /// Send a command and return its output, failing on a failed response.
    pub async fn run(&mut self, command: &str) -> Result<String> {
        let timeout = self.timeouts.command;
        self.run_with(command, &[], timeout).await
    }

    /// [`run`](Self::run) with answers and an explicit timeout.
    pub async fn run_with(&mut self, command: &str, answers: &[Answer], timeout: Duration) -> Result<String> {
        let response = self.send_command_with(command, answers, timeout).await?;
        match response.failure_message {
            Some(message) => Err(DriverError::CommandFailed {
                command: command.to_string(),
                message,
            }
            .into()),
            None => Ok(response.result),
        }
    }

    /// Send a command that makes the device go away (reboot, reload).
    ///
    /// A dropped connection or a missing prompt is the expected outcome.
    pub async fn run_terminal(&mut self, command: &str, answers: &[Answer]) -> Result<()> {
        let timeout = self.timeouts.command;
        match self.run_with(command, answers, timeout).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_disconnect() => {
                debug!("{}: '{}' dropped the connection", self.device.hostname, command);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Upload a local file to the device.
    pub async fn transfer_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        let timeout = self.timeouts.transfer;
        info!("{}: uploading {} as {}", self.device.hostname, local.display(), remote);
        self.session.transfer_file(local, remote, timeout).await
    }
}
