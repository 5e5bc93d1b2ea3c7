//! MikroTik RouterOS driver.
//!
//! RouterOS accepts one command per exec channel and prints errors on
//! standard output, so failures are detected by pattern. Upgrades push the
//! `.npk` package over SCP and reboot; the package installs during boot.
//! Optional packages (`wireless`, `container`, ...) must be uploaded in the
//! same version alongside it, or RouterOS disables them after the reboot.
//! RouterBOARD hardware then needs its boot loader upgraded separately,
//! which costs one more reboot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use super::REBOOT_COMMANDS;
use crate::driver::{
    Capabilities, DriverDefinition, DriverSession, RebootFollowUp, UpgradeOutcome, VendorBehavior,
};
use crate::error::{DriverError, Error, ImageError, Result};
use crate::image::{ImageDelivery, ImageNaming, ImageReference};
use crate::parsers::{tabular, vertical_value};

const RESOURCE_PRINT: &str = "/system resource print";
const ROUTERBOARD_PRINT: &str = "/system routerboard print";
const PACKAGE_PRINT: &str = "/system/package print";
const MAIN_PACKAGE: &str = "routeros";

/// Create the RouterOS driver definition.
pub fn driver() -> DriverDefinition {
    let mut definition = DriverDefinition::new("routeros")
        .with_capabilities(Capabilities::with_upgrade())
        .with_failure_pattern("bad command name")
        .with_failure_pattern("expected end of command")
        .with_failure_pattern("syntax error")
        .with_failure_pattern("failure:")
        .with_failure_pattern("no such item")
        .with_failure_pattern("input does not match any value")
        .with_image_naming(ImageNaming::standard("routeros", "npk"))
        .with_image_delivery(ImageDelivery::Push)
        .with_reboot_after_upgrade()
        .with_behavior(Arc::new(RouterOsBehavior));

    for pattern in REBOOT_COMMANDS {
        definition = definition.with_terminal_command(pattern).unwrap();
    }
    definition
}

/// RouterOS procedures.
pub struct RouterOsBehavior;

/// `current-firmware` and `upgrade-firmware` of a RouterBOARD.
fn routerboard_firmware(output: &str) -> Option<(&str, &str)> {
    Some((
        vertical_value(output, "current-firmware", ':')?,
        vertical_value(output, "upgrade-firmware", ':')?,
    ))
}

/// Installed packages other than the main one, in listing order.
///
/// Rows whose name column holds a status flag (`X` for disabled) are left
/// alone.
fn extra_package_names(output: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in tabular(output, &["#", "NAME", "VERSION"], 0) {
        let Some(name) = row.get("NAME") else {
            continue;
        };
        let is_flag = name.len() == 1 && name.chars().all(|c| c.is_ascii_uppercase());
        if name == MAIN_PACKAGE || is_flag || names.contains(name) {
            continue;
        }
        names.push(name.clone());
    }
    names
}

impl RouterOsBehavior {
    /// Local images of the installed extra packages for `image`'s version.
    ///
    /// They are expected next to the main image. Every one must exist
    /// before anything is uploaded.
    async fn extra_packages(
        cx: &mut DriverSession<'_>,
        image: &ImageReference,
        main: &Path,
    ) -> Result<Vec<(PathBuf, String)>> {
        let output = cx.run(PACKAGE_PRINT).await?;
        let names = extra_package_names(&output);
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let naming = cx
            .definition()
            .image_naming
            .clone()
            .ok_or_else(|| ImageError::NoNaming {
                model: cx.definition().name.clone(),
            })?;
        let platform = cx
            .device()
            .platform
            .clone()
            .ok_or_else(|| ImageError::MissingPlatform {
                host: cx.host().to_string(),
            })?;
        let directory = main.parent().unwrap_or_else(|| Path::new("."));

        let mut packages = Vec::with_capacity(names.len());
        for name in names {
            let filename = naming.for_model(name.as_str()).filename(&platform, image.version());
            let local = directory.join(&filename);
            if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                return Err(ImageError::NotFound {
                    filename,
                    searched: format!("{} (installed package '{name}')", directory.display()),
                }
                .into());
            }
            debug!("{}: extra package {}", cx.host(), local.display());
            packages.push((local, filename));
        }
        Ok(packages)
    }
}

#[async_trait]
impl VendorBehavior for RouterOsBehavior {
    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        let output = cx.run(RESOURCE_PRINT).await?;
        // "7.10.2 (stable)"
        vertical_value(&output, "version", ':')
            .and_then(|v| v.split_whitespace().next())
            .map(str::to_string)
            .ok_or_else(|| {
                DriverError::UnexpectedOutput {
                    command: RESOURCE_PRINT.to_string(),
                    message: "no version field".to_string(),
                }
                .into()
            })
    }

    async fn platform(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let output = cx.run(RESOURCE_PRINT).await?;
        match vertical_value(&output, "architecture-name", ':') {
            Some(architecture) => Ok(Some(architecture.to_string())),
            None => Err(DriverError::UnexpectedOutput {
                command: RESOURCE_PRINT.to_string(),
                message: "no architecture-name field".to_string(),
            }
            .into()),
        }
    }

    async fn firmware_version(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        match cx.run(ROUTERBOARD_PRINT).await {
            Ok(output) => Ok(vertical_value(&output, "current-firmware", ':').map(str::to_string)),
            // Not a RouterBOARD (CHR, x86)
            Err(Error::Driver(DriverError::CommandFailed { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upgrade(&self, cx: &mut DriverSession<'_>, image: &ImageReference) -> Result<UpgradeOutcome> {
        let Some(path) = image.local_path() else {
            return Err(DriverError::UpgradeFailed {
                message: format!("RouterOS needs a local image, got {image}"),
            }
            .into());
        };

        let extras = Self::extra_packages(cx, image, path).await?;
        for (local, remote) in &extras {
            cx.transfer_file(local, remote).await?;
        }
        cx.transfer_file(path, image.filename()).await?;
        info!("{}: {} package(s) uploaded, rebooting", cx.host(), extras.len() + 1);
        cx.run_terminal("/system/reboot", &[]).await?;
        Ok(UpgradeOutcome::Completed)
    }

    async fn after_reboot(&self, cx: &mut DriverSession<'_>) -> Result<RebootFollowUp> {
        let output = match cx.run(ROUTERBOARD_PRINT).await {
            Ok(output) => output,
            Err(Error::Driver(DriverError::CommandFailed { .. })) => return Ok(RebootFollowUp::Done),
            Err(e) => return Err(e),
        };

        let Some((current, upgrade)) = routerboard_firmware(&output) else {
            return Ok(RebootFollowUp::Done);
        };
        if current == upgrade {
            return Ok(RebootFollowUp::Done);
        }

        info!(
            "{}: upgrading RouterBOARD firmware {} -> {}",
            cx.host(),
            current,
            upgrade
        );
        cx.run("/system routerboard upgrade").await?;
        // Give the boot loader write a moment before rebooting
        tokio::time::sleep(cx.timeouts().poll_interval.max(Duration::from_millis(10))).await;
        cx.run_terminal("/system/reboot", &[]).await?;
        Ok(RebootFollowUp::RebootAgain)
    }
}
