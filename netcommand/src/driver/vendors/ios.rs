//! Cisco IOS driver.
//!
//! Commands and version queries only; IOS images are not handled.
//!
//! # Prompt Examples
//!
//! ```text
//! switch>                  # user exec
//! switch#                  # privileged exec
//! switch(config-if)#       # configuration
//! ```

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::{REBOOT_COMMANDS, enable_answer};
use crate::driver::{Capabilities, DriverDefinition, DriverSession, VendorBehavior};
use crate::error::{DriverError, Result};
use crate::parsers::{fixed_width_tabular, regex_value};

const SHOW_VERSION: &str = "show version";
const VERSION_HEADER: [&str; 6] = ["Switch", "Ports", "Model", "SW Version", "SW Image", "Mode"];
const VERSION_HEADER_XE: [&str; 5] = ["Switch", "Ports", "Model", "SW Version", "SW Image"];

// "Cisco IOS Software, C2960X Software (...), Version 15.2(7)E4, RELEASE SOFTWARE"
static BANNER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Cisco IOS.*Version ([^\s,]+)").unwrap());

/// Create the Cisco IOS driver definition.
pub fn driver() -> DriverDefinition {
    let mut definition = DriverDefinition::new("ios")
        .with_capabilities(Capabilities::commands_only())
        .with_shell_prompt(r"(?m)^[\w.\-@()/: ]{1,63}[>#]")
        .unwrap()
        .with_failure_pattern("% Invalid input detected at")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Ambiguous command")
        .with_on_open_command("terminal length 0")
        .with_behavior(Arc::new(IosBehavior));

    for pattern in REBOOT_COMMANDS {
        definition = definition.with_terminal_command(pattern).unwrap();
    }
    definition
}

/// Cisco IOS procedures.
pub struct IosBehavior;

/// `SW Version` of the first switch in `show version` output.
fn parse_version(output: &str) -> Option<String> {
    [&VERSION_HEADER[..], &VERSION_HEADER_XE[..]]
        .into_iter()
        .find_map(|header| {
            fixed_width_tabular(output, header)
                .into_iter()
                .next()
                .and_then(|mut row| row.shift_remove("SW Version"))
                .filter(|v| !v.is_empty())
        })
        .or_else(|| regex_value(output, &BANNER_VERSION).map(str::to_string))
}

#[async_trait]
impl VendorBehavior for IosBehavior {
    async fn on_open(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        let answers = enable_answer(cx.enable_password());
        let timeout = cx.timeouts().command;
        cx.run_with("enable", &answers, timeout).await?;
        Ok(())
    }

    async fn software_version(&self, cx: &mut DriverSession<'_>) -> Result<String> {
        let output = cx.run(SHOW_VERSION).await?;
        parse_version(&output).ok_or_else(|| {
            DriverError::UnexpectedOutput {
                command: SHOW_VERSION.to_string(),
                message: "no SW Version".to_string(),
            }
            .into()
        })
    }

    async fn save_config(&self, cx: &mut DriverSession<'_>) -> Result<()> {
        const COMMAND: &str = "write memory";
        let output = cx.run(COMMAND).await?;
        if !output.contains("[OK]") {
            return Err(DriverError::CommandFailed {
                command: COMMAND.to_string(),
                message: "configuration was not saved".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
