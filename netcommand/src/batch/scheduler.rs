use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::BatchReport;
use crate::config::{BatchConfig, RetryPolicy};
use crate::driver::{Driver, DriverRegistry};
use crate::error::{ImageError, Result, SelectionError};
use crate::image::{ImageReference, ImageRequest, ImageResolver};
use crate::inventory::DeviceDescriptor;
use crate::operation::Operation;
use crate::runner::{SessionResult, SessionRunner};
use crate::transport::Transport;

/// One validated target, ready to run.
struct Planned {
    device: Arc<DeviceDescriptor>,
    driver: Driver,
    image: Option<ImageReference>,
}

/// Runs one operation over a set of devices.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use netcommand::batch::BatchScheduler;
/// use netcommand::image::ImageResolver;
/// use netcommand::inventory::{CredentialOverrides, Inventory, SelectionFilter, resolve};
/// use netcommand::operation::Operation;
/// use netcommand::transport::{SshOptions, SshTransport};
///
/// # async fn example() -> Result<(), netcommand::Error> {
/// let inventory = Inventory::load("inventory.yaml", &CredentialOverrides::from_env())?;
/// let targets = resolve(&inventory, &SelectionFilter::parse("edge"))?;
///
/// let transport = Arc::new(SshTransport::new(SshOptions::default(), Duration::from_secs(30)));
/// let images = Arc::new(ImageResolver::new(Duration::from_secs(600))?);
/// let scheduler = BatchScheduler::new(transport, images);
///
/// let report = scheduler
///     .run_batch(&targets, Operation::commands(["/system resource print"]))
///     .await?;
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
pub struct BatchScheduler {
    transport: Arc<dyn Transport>,
    registry: Arc<DriverRegistry>,
    images: Arc<ImageResolver>,
    config: BatchConfig,
    cancel: CancellationToken,
}

impl BatchScheduler {
    /// Scheduler with the built-in drivers and the default configuration.
    pub fn new(transport: Arc<dyn Transport>, images: Arc<ImageResolver>) -> Self {
        Self {
            transport,
            registry: DriverRegistry::builtin(),
            images,
            config: BatchConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a different driver registry.
    pub fn with_registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Set the batch configuration.
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancel the batch through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `operation` on every target.
    ///
    /// Errors returned here are pre-batch errors: nothing has been sent to
    /// any device. Everything that happens on a device is recorded in the
    /// report instead.
    pub async fn run_batch(&self, targets: &[Arc<DeviceDescriptor>], operation: Operation) -> Result<BatchReport> {
        let started = Instant::now();
        let plan = self.prepare(targets, &operation).await?;

        info!(
            "{}: {} device(s), concurrency {}{}",
            operation,
            plan.len(),
            self.config.concurrency,
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        let operation = Arc::new(operation);
        let results = self.execute(plan, operation.clone()).await;
        let report = BatchReport::new((*operation).clone(), self.config.dry_run, results, started.elapsed());

        let counts = report.counts();
        info!(
            "{} finished in {:.1?}: {} succeeded, {} failed, {} skipped, {} cancelled",
            operation,
            report.elapsed(),
            counts.success,
            counts.failed,
            counts.skipped,
            counts.cancelled
        );
        Ok(report)
    }

    /// Validate every target and resolve images before touching any device.
    async fn prepare(&self, targets: &[Arc<DeviceDescriptor>], operation: &Operation) -> Result<Vec<Planned>> {
        if targets.is_empty() {
            return Err(SelectionError::NoTargets.into());
        }

        let mut drivers = Vec::with_capacity(targets.len());
        for device in targets {
            let driver = self.registry.lookup(&device.model)?;
            driver.ensure_supports(operation)?;
            drivers.push(driver);
        }

        let images = match operation {
            Operation::Upgrade(request) => self.resolve_images(targets, &drivers, &request.version).await?,
            _ => vec![None; targets.len()],
        };

        Ok(targets
            .iter()
            .zip(drivers)
            .zip(images)
            .map(|((device, driver), image)| Planned {
                device: device.clone(),
                driver,
                image,
            })
            .collect())
    }

    /// Resolve the upgrade image of every target.
    ///
    /// Targets sharing an image share its resolution. The first failure in
    /// target order is reported.
    async fn resolve_images(
        &self,
        targets: &[Arc<DeviceDescriptor>],
        drivers: &[Driver],
        version: &str,
    ) -> Result<Vec<Option<ImageReference>>> {
        let mut requests = Vec::with_capacity(targets.len());
        for (device, driver) in targets.iter().zip(drivers) {
            requests.push(image_request(device, driver, version)?);
        }

        // A dry run validates images without downloading them
        let dry_run = self.config.dry_run;
        let resolved = join_all(requests.into_iter().map(|request| async move {
            if dry_run {
                self.images.check(request).await
            } else {
                self.images.resolve(request).await
            }
        }))
        .await;

        let mut images = Vec::with_capacity(resolved.len());
        for (device, image) in targets.iter().zip(resolved) {
            let image = image?;
            debug!("{}: image {}", device.hostname, image);
            images.push(Some(image));
        }
        Ok(images)
    }

    async fn execute(&self, plan: Vec<Planned>, operation: Arc<Operation>) -> Vec<SessionResult> {
        let hosts: Vec<Arc<DeviceDescriptor>> = plan.iter().map(|p| p.device.clone()).collect();
        let slots: Arc<Mutex<Vec<Option<SessionResult>>>> = Arc::new(Mutex::new(vec![None; plan.len()]));
        let gate = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let runner = Arc::new(SessionRunner::new(
            self.transport.clone(),
            self.config.timeouts.clone(),
            self.cancel.clone(),
        ));

        // Cancelled on global cancellation, or by stop-on-error; only gates
        // new starts, sessions in flight keep running.
        let starts = self.cancel.child_token();
        let stop_on_error = self.config.stop_on_error;
        let dry_run = self.config.dry_run;

        let mut tasks = JoinSet::new();
        for (index, planned) in plan.into_iter().enumerate() {
            let gate = gate.clone();
            let runner = runner.clone();
            let operation = operation.clone();
            let slots = slots.clone();
            let starts = starts.clone();
            let cancel = self.cancel.clone();
            let retry = self.config.retry.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = starts.cancelled() => None,
                    permit = gate.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => {
                        let result = run_with_retry(&runner, &retry, &cancel, &planned, &operation, dry_run).await;
                        if stop_on_error && result.is_failed() {
                            warn!("{}: failed, not starting further devices", planned.device.hostname);
                            starts.cancel();
                        }
                        result
                    }
                    None if cancel.is_cancelled() => SessionResult::cancelled(&planned.device, "cancelled before start"),
                    None => SessionResult::cancelled(&planned.device, "not started after an earlier failure"),
                };

                slots.lock().await[index] = Some(result);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("session task died: {e}");
                if stop_on_error {
                    starts.cancel();
                }
            }
        }

        let mut slots = slots.lock().await;
        hosts
            .iter()
            .zip(slots.iter_mut())
            .map(|(device, slot)| {
                slot.take()
                    .unwrap_or_else(|| SessionResult::internal_error(device, "session task panicked"))
            })
            .collect()
    }
}

/// Build the image request for one target.
fn image_request<'a>(device: &'a DeviceDescriptor, driver: &'a Driver, version: &'a str) -> Result<ImageRequest<'a>> {
    let platform = device
        .platform
        .as_deref()
        .ok_or_else(|| ImageError::MissingPlatform {
            host: device.hostname.clone(),
        })?;
    let naming = driver
        .definition()
        .image_naming
        .as_ref()
        .ok_or_else(|| ImageError::NoNaming {
            model: device.model.clone(),
        })?;
    let source = device
        .image_source
        .as_deref()
        .ok_or_else(|| ImageError::NotFound {
            filename: naming.filename(platform, version),
            searched: format!("no image source configured for model '{}'", device.model),
        })?;

    Ok(ImageRequest {
        model: &device.model,
        platform,
        version,
        naming,
        delivery: driver.definition().image_delivery,
        source,
    })
}

/// Run one session, retrying connection failures per `retry`.
async fn run_with_retry(
    runner: &SessionRunner,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    planned: &Planned,
    operation: &Operation,
    dry_run: bool,
) -> SessionResult {
    let mut attempt = 1;
    loop {
        let result = runner
            .run(&planned.device, &planned.driver, operation, planned.image.as_ref(), dry_run)
            .await;

        if attempt > retry.max_retries || !result.failed_before_execution() || cancel.is_cancelled() {
            return result.with_attempts(attempt);
        }

        let delay = retry.delay_for(attempt);
        warn!(
            "{}: attempt {} failed ({}), retrying in {:?}",
            planned.device.hostname,
            attempt,
            result.error().map(|e| e.kind.as_str()).unwrap_or("unknown"),
            delay
        );
        tokio::select! {
            _ = cancel.cancelled() => return result.with_attempts(attempt),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
