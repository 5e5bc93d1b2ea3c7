//! Per-device session lifecycle.
//!
//! A [`SessionRunner`] takes one device through
//! `Idle → Connecting → Authenticating → Executing → (Verifying) →
//! Disconnecting → Done`, or straight from `Idle` to `Done(Skipped)` in a
//! dry run, and always produces exactly one [`SessionResult`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::driver::{Driver, RebootFollowUp, Response, UpgradeOutcome};
use crate::error::{DriverError, Error, ErrorDetail, ErrorKind, Result, TransportError};
use crate::image::ImageReference;
use crate::inventory::DeviceDescriptor;
use crate::operation::{CommandBatch, Operation, UpgradeRequest};
use crate::transport::{Session, Transport};
use crate::version::{compare_versions, same_version};

/// Reboots an upgrade may take before the device is expected to settle.
const MAX_REBOOTS: usize = 2;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Executing,
    Verifying,
    Disconnecting,
    Done(SessionStatus),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Done(status) => write!(f, "Done({status})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Final status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Success => "SUCCESS",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Skipped => "SKIPPED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Immutable record of one device's session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    hostname: String,
    model: String,
    status: SessionStatus,
    transcript: Vec<Response>,
    error: Option<ErrorDetail>,
    notes: Vec<String>,
    states: Vec<SessionState>,
    elapsed: Duration,
    attempts: u32,
    initial_version: Option<String>,
    final_version: Option<String>,
    initial_firmware: Option<String>,
    final_firmware: Option<String>,
}

impl SessionResult {
    /// Result for a device that never started.
    pub fn cancelled(device: &DeviceDescriptor, reason: impl Into<String>) -> Self {
        let mut recorder = SessionRecorder::new(device);
        recorder.note(reason);
        recorder.finish(SessionStatus::Cancelled)
    }

    /// Result for a session whose task died unexpectedly.
    pub fn internal_error(device: &DeviceDescriptor, message: impl Into<String>) -> Self {
        let mut recorder = SessionRecorder::new(device);
        recorder.fail_detail(ErrorDetail::new(ErrorKind::InternalError, message));
        recorder.finish(SessionStatus::Failed)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.status == SessionStatus::Failed
    }

    /// Responses of the commands that were sent, in order.
    pub fn transcript(&self) -> &[Response] {
        &self.transcript
    }

    /// The first error the session hit.
    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Every state the session passed through, ending with `Done`.
    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Connection attempts, including retries.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn initial_version(&self) -> Option<&str> {
        self.initial_version.as_deref()
    }

    pub fn final_version(&self) -> Option<&str> {
        self.final_version.as_deref()
    }

    pub fn initial_firmware(&self) -> Option<&str> {
        self.initial_firmware.as_deref()
    }

    pub fn final_firmware(&self) -> Option<&str> {
        self.final_firmware.as_deref()
    }

    /// Whether the session failed before anything was sent to the device,
    /// with an error a new attempt might not hit.
    pub fn failed_before_execution(&self) -> bool {
        self.is_failed()
            && !self.states.contains(&SessionState::Executing)
            && self
                .error
                .as_ref()
                .is_some_and(|e| matches!(e.kind, ErrorKind::ConnectionFailed | ErrorKind::Timeout))
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Accumulates a session's result and finalizes it once.
///
/// The first recorded error is kept; later errors (cleanup, follow-on
/// failures) cannot replace it.
#[derive(Debug)]
pub struct SessionRecorder {
    result: SessionResult,
    started: Instant,
}

impl SessionRecorder {
    pub fn new(device: &DeviceDescriptor) -> Self {
        Self {
            result: SessionResult {
                hostname: device.hostname.clone(),
                model: device.model.clone(),
                status: SessionStatus::Failed,
                transcript: Vec::new(),
                error: None,
                notes: Vec::new(),
                states: vec![SessionState::Idle],
                elapsed: Duration::ZERO,
                attempts: 1,
                initial_version: None,
                final_version: None,
                initial_firmware: None,
                final_firmware: None,
            },
            started: Instant::now(),
        }
    }

    /// Record a state transition.
    pub fn enter(&mut self, state: SessionState) {
        debug!("{}: {}", self.result.hostname, state);
        self.result.states.push(state);
    }

    /// Record an error unless one is already recorded.
    pub fn fail(&mut self, err: &Error) {
        self.fail_detail(ErrorDetail::from(err));
    }

    pub fn fail_detail(&mut self, detail: ErrorDetail) {
        if let Some(first) = &self.result.error {
            debug!(
                "{}: ignoring subsequent error ({}), keeping {}",
                self.result.hostname, detail, first.kind
            );
            return;
        }
        warn!("{}: {}", self.result.hostname, detail);
        self.result.error = Some(detail);
    }

    pub fn has_error(&self) -> bool {
        self.result.error.is_some()
    }

    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!("{}: {}", self.result.hostname, note);
        self.result.notes.push(note);
    }

    pub fn push_response(&mut self, response: Response) {
        self.result.transcript.push(response);
    }

    fn set_initial(&mut self, version: Option<String>, firmware: Option<String>) {
        self.result.initial_version = version;
        self.result.initial_firmware = firmware;
    }

    fn set_final(&mut self, version: Option<String>, firmware: Option<String>) {
        self.result.final_version = version;
        self.result.final_firmware = firmware;
    }

    /// Finalize the result.
    ///
    /// A recorded error turns `Success` into `Failed`; `Cancelled` and
    /// `Skipped` are kept as requested.
    pub fn finish(mut self, status: SessionStatus) -> SessionResult {
        let status = match status {
            SessionStatus::Success if self.result.error.is_some() => SessionStatus::Failed,
            other => other,
        };
        self.result.status = status;
        self.result.elapsed = self.started.elapsed();
        self.enter(SessionState::Done(status));
        self.result
    }
}

/// Drives single devices through their sessions.
pub struct SessionRunner {
    transport: Arc<dyn Transport>,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl SessionRunner {
    pub fn new(transport: Arc<dyn Transport>, timeouts: Timeouts, cancel: CancellationToken) -> Self {
        Self {
            transport,
            timeouts,
            cancel,
        }
    }

    /// Run `operation` on `device`.
    ///
    /// Never fails: every outcome, including cancellation, is folded into
    /// the returned result. The session is closed on every path after a
    /// successful connect.
    pub async fn run(
        &self,
        device: &DeviceDescriptor,
        driver: &Driver,
        operation: &Operation,
        image: Option<&ImageReference>,
        dry_run: bool,
    ) -> SessionResult {
        let mut rec = SessionRecorder::new(device);

        if dry_run {
            for line in preview(driver, operation, image) {
                rec.note(line);
            }
            return rec.finish(SessionStatus::Skipped);
        }

        if self.cancel.is_cancelled() {
            rec.note("cancelled before start");
            return rec.finish(SessionStatus::Cancelled);
        }

        rec.enter(SessionState::Connecting);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = self.open(device, driver) => Some(opened),
        };
        let mut session = match opened {
            None => {
                rec.note("cancelled while connecting");
                return rec.finish(SessionStatus::Cancelled);
            }
            Some(Err(e)) => {
                if e.kind() == ErrorKind::AuthFailed {
                    rec.enter(SessionState::Authenticating);
                }
                rec.fail(&e);
                return rec.finish(SessionStatus::Failed);
            }
            Some(Ok(session)) => session,
        };

        let status = {
            let work = self.drive(&mut session, device, driver, operation, image, &mut rec);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => SessionStatus::Cancelled,
                status = work => status,
            }
        };
        if status == SessionStatus::Cancelled {
            rec.note("cancelled while running");
        }

        rec.enter(SessionState::Disconnecting);
        if let Err(e) = session.close().await {
            // Devices that just rebooted rarely close cleanly
            debug!("{}: close: {}", device.hostname, e);
        }

        rec.finish(status)
    }

    /// Connect and authenticate within the connect timeout.
    async fn open(&self, device: &DeviceDescriptor, driver: &Driver) -> Result<Box<dyn Session>> {
        let timeout = self.timeouts.connect;
        tokio::time::timeout(
            timeout,
            self.transport.open(&device.connection, driver.session_mode()),
        )
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
    }

    /// Everything between a successful connect and the disconnect.
    async fn drive(
        &self,
        session: &mut Box<dyn Session>,
        device: &DeviceDescriptor,
        driver: &Driver,
        operation: &Operation,
        image: Option<&ImageReference>,
        rec: &mut SessionRecorder,
    ) -> SessionStatus {
        rec.enter(SessionState::Authenticating);
        {
            let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
            if let Err(e) = driver.open(&mut cx).await {
                rec.fail(&e);
                return SessionStatus::Failed;
            }
        }

        rec.enter(SessionState::Executing);
        let outcome = match operation {
            Operation::Commands(batch) => {
                self.run_commands(session, device, driver, batch, rec).await;
                Ok(())
            }
            Operation::Version => self.read_version(session, device, driver, rec).await,
            Operation::Upgrade(request) => match image {
                Some(image) => {
                    self.upgrade(session, device, driver, request, image, rec)
                        .await
                }
                None => Err(Error::Internal(format!(
                    "no image resolved for {}",
                    device.hostname
                ))),
            },
        };

        if let Err(e) = outcome {
            rec.fail(&e);
        }
        if rec.has_error() {
            SessionStatus::Failed
        } else {
            SessionStatus::Success
        }
    }

    async fn run_commands(
        &self,
        session: &mut Box<dyn Session>,
        device: &DeviceDescriptor,
        driver: &Driver,
        batch: &CommandBatch,
        rec: &mut SessionRecorder,
    ) {
        let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
        let outcome = driver.run_commands(&mut cx, batch.commands()).await;

        for response in outcome.transcript {
            if let Some(message) = &response.failure_message {
                rec.fail_detail(ErrorDetail::new(
                    ErrorKind::CommandFailed,
                    format!("Command '{}' failed: {}", response.command, message),
                ));
            }
            rec.push_response(response);
        }

        if let Some((command, remaining)) = outcome.stopped_after {
            rec.note(format!(
                "'{command}' ends the session; no further commands were sent ({remaining} skipped)"
            ));
        }

        if let Some(e) = outcome.error {
            rec.fail(&e);
        }
    }

    async fn read_version(
        &self,
        session: &mut Box<dyn Session>,
        device: &DeviceDescriptor,
        driver: &Driver,
        rec: &mut SessionRecorder,
    ) -> Result<()> {
        let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
        let version = driver.software_version(&mut cx).await?;
        let firmware = firmware_or_none(driver.firmware_version(&mut cx).await, &device.hostname);
        info!("{}: running {}", device.hostname, version);
        rec.set_initial(Some(version.clone()), firmware.clone());
        rec.set_final(Some(version), firmware);
        Ok(())
    }

    async fn upgrade(
        &self,
        session: &mut Box<dyn Session>,
        device: &DeviceDescriptor,
        driver: &Driver,
        request: &UpgradeRequest,
        image: &ImageReference,
        rec: &mut SessionRecorder,
    ) -> Result<()> {
        let target = request.version.as_str();

        let outcome = {
            let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
            driver.save_config(&mut cx).await?;

            let current = driver.software_version(&mut cx).await?;
            let firmware = firmware_or_none(driver.firmware_version(&mut cx).await, &device.hostname);
            rec.set_initial(Some(current.clone()), firmware.clone());

            if let (Some(expected), Some(reported)) =
                (device.platform.as_deref(), driver.platform(&mut cx).await?)
            {
                if reported != expected {
                    return Err(DriverError::PlatformMismatch {
                        reported,
                        expected: expected.to_string(),
                        image: image.filename().to_string(),
                    }
                    .into());
                }
            }

            if same_version(&current, target) {
                rec.set_final(Some(current.clone()), firmware);
                rec.note(format!("already running {current}, nothing to do"));
                return Ok(());
            }
            if compare_versions(&current, target) == Some(Ordering::Greater) {
                return Err(DriverError::DowngradeRefused {
                    current,
                    requested: target.to_string(),
                }
                .into());
            }

            info!("{}: upgrading {} -> {} using {}", device.hostname, current, target, image);
            driver.upgrade(&mut cx, image).await?
        };

        match outcome {
            UpgradeOutcome::Unsupported => Err(DriverError::UnsupportedOperation {
                model: driver.name().to_string(),
                operation: "upgrade".to_string(),
            }
            .into()),
            UpgradeOutcome::CompletedPendingReload => {
                rec.note(format!("{target} installed; reload the device to activate it"));
                Ok(())
            }
            UpgradeOutcome::Completed => {
                rec.enter(SessionState::Verifying);
                if driver.definition().reboots_after_upgrade {
                    self.await_reboots(session, device, driver).await?;
                }

                let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
                let running = driver.software_version(&mut cx).await?;
                let firmware = firmware_or_none(driver.firmware_version(&mut cx).await, &device.hostname);
                rec.set_final(Some(running.clone()), firmware);

                if !same_version(&running, target) {
                    return Err(DriverError::VersionNotApplied {
                        expected: target.to_string(),
                        found: running,
                    }
                    .into());
                }
                info!("{}: now running {}", device.hostname, running);
                Ok(())
            }
        }
    }

    /// Wait out the upgrade reboot(s), leaving `session` connected to the
    /// restarted device.
    async fn await_reboots(
        &self,
        session: &mut Box<dyn Session>,
        device: &DeviceDescriptor,
        driver: &Driver,
    ) -> Result<()> {
        for round in 1..=MAX_REBOOTS {
            if let Err(e) = session.close().await {
                debug!("{}: close before reboot wait: {}", device.hostname, e);
            }
            info!(
                "{}: waiting {:?} for the device to reboot",
                device.hostname, self.timeouts.reboot_grace
            );
            tokio::time::sleep(self.timeouts.reboot_grace).await;

            *session = self.reconnect(device, driver).await?;

            let mut cx = driver.bind(session.as_mut(), device, &self.timeouts);
            driver.open(&mut cx).await?;
            match driver.after_reboot(&mut cx).await? {
                RebootFollowUp::Done => return Ok(()),
                RebootFollowUp::RebootAgain => {
                    debug!("{}: reboot {} of {} requested", device.hostname, round + 1, MAX_REBOOTS);
                }
            }
        }

        Err(DriverError::UpgradeFailed {
            message: format!("device still rebooting after {MAX_REBOOTS} reboots"),
        }
        .into())
    }

    /// Keep connecting until the device answers or the reconnect window closes.
    async fn reconnect(&self, device: &DeviceDescriptor, driver: &Driver) -> Result<Box<dyn Session>> {
        let deadline = Instant::now() + self.timeouts.reconnect;
        let interval = self.timeouts.poll_interval;

        loop {
            match self.open(device, driver).await {
                Ok(session) => {
                    debug!("{}: reconnected", device.hostname);
                    return Ok(session);
                }
                Err(e) if e.is_transient_connect() && Instant::now() + interval < deadline => {
                    debug!("{}: not back yet: {}", device.hostname, e);
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn firmware_or_none(result: Result<Option<String>>, hostname: &str) -> Option<String> {
    match result {
        Ok(firmware) => firmware,
        Err(e) => {
            debug!("{}: firmware version unavailable: {}", hostname, e);
            None
        }
    }
}

/// What a dry run would do on one device.
fn preview(driver: &Driver, operation: &Operation, image: Option<&ImageReference>) -> Vec<String> {
    match operation {
        Operation::Commands(batch) => {
            let mut lines = vec![format!("would send {} command(s)", batch.len())];
            for command in batch.commands() {
                let marker = if driver.definition().is_terminal_command(command) {
                    " (ends session)"
                } else {
                    ""
                };
                lines.push(format!("  {command}{marker}"));
            }
            lines
        }
        Operation::Upgrade(request) => {
            let mut lines = vec![format!("would upgrade to {}", request.version)];
            if let Some(image) = image {
                lines.push(format!("  image {image}"));
            }
            if driver.capabilities().upgrade_requires_manual_reload {
                lines.push("  reload required afterwards".to_string());
            }
            lines
        }
        Operation::Version => vec!["would read the software version".to_string()],
    }
}
