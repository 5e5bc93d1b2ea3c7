//! Dell N-series (OS6) driver.
//!
//! The switch keeps two image slots, `active` and `backup`. An upgrade
//! copies the new image into the backup slot straight from the image
//! server, selects the backup slot for the next boot and reloads.
//!
//! # Prompt Examples
//!
//! ```text
//! console>                 # user exec
//! console#                 # privileged exec
//! console(config)#         # configuration
//! ```

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use log::info;
use secrecy::ExposeSecret;

use super::{REBOOT_COMMANDS, enable_answer};
use crate::channel::Answer;
use crate::driver::{Capabilities, DriverDefinition, DriverSession, UpgradeOutcome, VendorBehavior};
use crate::error::{DriverError, Result};
use crate::image::{ImageDelivery, ImageNaming, ImageReference};
use crate::parsers::{match_text, regex_value, tabular};
use crate::version::same_version;

const SHOW_VERSION: &str = "show version";
const VERSION_HEADER: [&str; 5] = ["unit", "active", "backup", "current-active", "next-active"];

static CPLD_VERSION: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^CPLD Version\.+ (.+)$").unwrap());
static MODEL_ID: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^System Model ID\.+ (.+)$").unwrap());

/// Create the Dell N-series driver definition.
pub fn driver() -> DriverDefinition {
    let mut definition = DriverDefinition::new("delln")
        .with_capabilities(Capabilities::with_upgrade())
        .with_shell_prompt(r"(?m)^[\w.\-@()/: ]{1,63}[>#]")
        .unwrap()
        .with_failure_pattern("% Invalid input detected at")
        .with_failure_pattern("% Incomplete command")
        .with_on_open_command("terminal length 0")
        .with_image_naming(ImageNaming::template("{platform}v{version}.stk"))
        .with_image_delivery(ImageDelivery::Pull)
        .with_reboot_after_upgrade()
        .with_behavior(Arc::new(DellNBehavior));

    for pattern in REBOOT_COMMANDS {
        definition = definition.with_terminal_command(pattern).unwrap();
    }
    definition
}

/// Dell N-series procedures.
pub struct DellNBehavior;

/// Image family of a model id: `N1548P` is `N1500`. Other ids are their own
/// family.
fn model_family(model_id: &str) -> String {
    match model_id.get(..3) {
        Some(series) if model_id.starts_with('N') => format!("{series}00"),
        _ => model_id.to_string(),
    }
}

impl DellNBehavior {
    /// Version in image slot `column` of the first stack unit.
    async fn slot_version(cx: &mut DriverSession<'_>, column: &str) -> Result<String> {
        let output = cx.run(SHOW_VERSION).await?;
        tabular(&output, &VERSION_HEADER, 1)
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove(column))
            .ok_or_else(|| {
                DriverError::UnexpectedOutput {
                    command: SHOW_VERSION.to_string(),
                    message: format!("no '{column}' image version"),
                }
                .into()
            })
    }

    fn upgrade_answers(image: &ImageReference) -> Vec<Answer> {
        let mut answers: Vec<Answer> = [
            r"Are you sure you want to start\?",
            r"Are you sure you want to continue\?",
            r"Are you sure you want to reload the stack\?",
        ]
        .into_iter()
        .filter_map(|question| Answer::new(question, "y").ok())
        .collect();

        if let Some(password) = image.password() {
            answers.extend(Answer::hidden(r"Remote Password:", password.expose_secret()).ok());
        }
        answers
    }
}

#[async_trait]
impl VendorBehavior for DellNBehavior {
    async fn on_open(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        let answers = enable_answer(cx.enable_password());
        let timeout = cx.timeouts().command;
        cx.run_with("enable", &answers, timeout).await?;
        Ok(())
    }

    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        Self::slot_version(cx, "active").await
    }

    async fn platform(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let output = cx.run(SHOW_VERSION).await?;
        match regex_value(&output, &MODEL_ID) {
            Some(model_id) => Ok(Some(model_family(model_id))),
            None => Err(DriverError::UnexpectedOutput {
                command: SHOW_VERSION.to_string(),
                message: "no System Model ID".to_string(),
            }
            .into()),
        }
    }

    async fn firmware_version(&self, cx: &mut DriverSession<'_>) -> Result<Option<String>> {
        let output = cx.run(SHOW_VERSION).await?;
        Ok(regex_value(&output, &CPLD_VERSION).map(str::to_string))
    }

    async fn save_config(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        const COMMAND: &str = "copy running-config startup-config";
        let answers: Vec<Answer> = Answer::new(r"Are you sure you want to save\?", "y")
            .into_iter()
            .collect();
        let timeout = cx.timeouts().command;
        let output = cx.run_with(COMMAND, &answers, timeout).await?;
        if match_text(&output, "Configuration Saved!").is_none() {
            return Err(DriverError::CommandFailed {
                command: COMMAND.to_string(),
                message: "configuration was not saved".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn upgrade(&self, cx: &mut DriverSession<'_>, image: &ImageReference) -> Result<UpgradeOutcome> {
        let Some(url) = image.url() else {
            return Err(DriverError::UpgradeFailed {
                message: format!("Dell N-series needs a remote image URL, got {image}"),
            }
            .into());
        };
        let answers = Self::upgrade_answers(image);
        let target = image.version();

        let backup = Self::slot_version(cx, "backup").await?;
        if same_version(&backup, target) {
            info!("{}: backup image already at {}", cx.host(), target);
        } else {
            info!("{}: copying {} into the backup slot (was {})", cx.host(), url, backup);
            let timeout = cx.timeouts().transfer;
            let output = cx.run_with(&format!("copy {url} backup"), &answers, timeout).await?;
            if match_text(&output, "File transfer operation completed successfully.").is_none() {
                return Err(DriverError::UpgradeFailed {
                    message: format!("image copy did not complete: {}", output.trim()),
                }
                .into());
            }

            let backup = Self::slot_version(cx, "backup").await?;
            if !same_version(&backup, target) {
                return Err(DriverError::UpgradeFailed {
                    message: format!("backup image version {backup} does not match {target}"),
                }
                .into());
            }
        }

        let mut next = Self::slot_version(cx, "next-active").await?;
        if !same_version(&next, target) {
            cx.run("boot system backup").await?;
            next = Self::slot_version(cx, "next-active").await?;
        }
        if !same_version(&next, target) {
            return Err(DriverError::UpgradeFailed {
                message: format!("boot image version {next} does not match {target}"),
            }
            .into());
        }

        info!("{}: reloading into {}", cx.host(), target);
        cx.run_terminal("reload", &answers).await?;
        Ok(UpgradeOutcome::Completed)
    }
}
