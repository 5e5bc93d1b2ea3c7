//! Dell OS10 driver.
//!
//! OS10 downloads and installs images in the background into the standby
//! partition; progress is visible in `show image status`. The driver waits
//! for both steps, selects the standby partition for the next boot and
//! leaves the reload to the operator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use super::REBOOT_COMMANDS;
use crate::driver::{Capabilities, DriverDefinition, DriverSession, UpgradeOutcome, VendorBehavior};
use crate::error::{DriverError, Result, TransportError};
use crate::image::{ImageDelivery, ImageNaming, ImageReference};
use crate::parsers::vertical_value;

const SHOW_VERSION: &str = "show version";
const SHOW_IMAGE_STATUS: &str = "show image status";

/// Create the Dell OS10 driver definition.
pub fn driver() -> DriverDefinition {
    let mut definition = DriverDefinition::new("dellos10")
        .with_capabilities(Capabilities::with_upgrade().manual_reload())
        .with_shell_prompt(r"(?m)^[\w.\-@()/: ]{1,63}#")
        .unwrap()
        .with_failure_pattern("% Error")
        .with_failure_pattern("% Invalid")
        .with_on_open_command("terminal length 0")
        .with_image_naming(ImageNaming::standard("os10", "bin"))
        .with_image_delivery(ImageDelivery::Pull)
        .with_behavior(Arc::new(DellOs10Behavior));

    for pattern in REBOOT_COMMANDS {
        definition = definition.with_terminal_command(pattern).unwrap();
    }
    definition
}

/// Dell OS10 procedures.
pub struct DellOs10Behavior;

/// What a status poll concluded.
enum Progress {
    Running,
    Finished,
    Failed(String),
}

impl DellOs10Behavior {
    /// Poll `show image status` until `classify` reports an end state.
    async fn wait_for(
        cx: &mut DriverSession<'_>,
        field: &str,
        limit: Duration,
        classify: fn(&str) -> Progress,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + limit;
        let interval = cx.timeouts().poll_interval;

        loop {
            let output = cx.run(SHOW_IMAGE_STATUS).await?;
            let state = vertical_value(&output, field, ':').unwrap_or_default();
            debug!("{}: {} is '{}'", cx.host(), field, state);

            match classify(state) {
                Progress::Finished => return Ok(()),
                Progress::Failed(state) => {
                    return Err(DriverError::UpgradeFailed {
                        message: format!("{field}: {state}"),
                    }
                    .into());
                }
                Progress::Running => {}
            }

            if tokio::time::Instant::now() + interval > deadline {
                return Err(TransportError::Timeout(limit).into());
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn transfer_progress(state: &str) -> Progress {
    match state {
        "transfer-success" => Progress::Finished,
        "download" | "transfer-in-progress" => Progress::Running,
        other => Progress::Failed(other.to_string()),
    }
}

fn install_progress(state: &str) -> Progress {
    match state {
        "idle" | "install-success" => Progress::Finished,
        "install" | "install-in-progress" => Progress::Running,
        other => Progress::Failed(other.to_string()),
    }
}

/// OS10 edition from the first line of `show version`
/// (`Dell EMC Networking OS10 Enterprise`).
fn edition(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split_whitespace().last())
}

#[async_trait]
impl VendorBehavior for DellOs10Behavior {
    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        let output = cx.run(SHOW_VERSION).await?;
        vertical_value(&output, "Build Version", ':')
            .map(str::to_string)
            .ok_or_else(|| {
                DriverError::UnexpectedOutput {
                    command: SHOW_VERSION.to_string(),
                    message: "no Build Version field".to_string(),
                }
                .into()
            })
    }

    async fn platform(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let output = cx.run(SHOW_VERSION).await?;
        Ok(edition(&output).map(str::to_string))
    }

    async fn save_config(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        cx.run("write memory").await?;
        Ok(())
    }

    async fn upgrade(&self, cx: &mut DriverSession<'_>, image: &ImageReference) -> Result<UpgradeOutcome> {
        let Some(url) = image.url() else {
            return Err(DriverError::UpgradeFailed {
                message: format!("OS10 needs a remote image URL, got {image}"),
            }
            .into());
        };

        let command = format!("image download {url}");
        let output = cx.run(&command).await?;
        if !output.contains("Download started") {
            return Err(DriverError::UpgradeFailed {
                message: format!("image download did not start: {}", output.trim()),
            }
            .into());
        }

        let transfer = cx.timeouts().transfer;
        Self::wait_for(cx, "File Transfer State", transfer, transfer_progress).await?;
        info!("{}: {} downloaded, installing", cx.host(), image.filename());

        cx.run(&format!("image install image://{}", image.filename()))
            .await?;
        let install = cx.timeouts().install;
        Self::wait_for(cx, "Installation State", install, install_progress).await?;

        cx.run("boot system standby").await?;
        info!("{}: {} installed on the standby partition", cx.host(), image.version());
        Ok(UpgradeOutcome::CompletedPendingReload)
    }
}
