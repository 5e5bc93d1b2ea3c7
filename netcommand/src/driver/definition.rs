//! Driver definition for vendor-specific configuration.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::{Capabilities, VendorBehavior};
use crate::channel::compile_prompt_pattern;
use crate::image::{ImageDelivery, ImageNaming};
use crate::transport::SessionMode;

/// Everything the engine needs to know about one device model.
#[derive(Clone)]
pub struct DriverDefinition {
    /// Model key used in the inventory (e.g. "routeros", "ios").
    pub name: String,

    /// Operations the driver supports.
    pub capabilities: Capabilities,

    /// How commands are delivered.
    pub session_mode: SessionMode,

    /// Output substrings that mark a command as failed.
    pub failed_when_contains: Vec<String>,

    /// Commands sent after the session is opened.
    pub on_open_commands: Vec<String>,

    /// Commands after which the device stops accepting input
    /// (reboot, reload). Matched against the trimmed command.
    pub terminal_commands: Vec<Regex>,

    /// Firmware image filename convention.
    pub image_naming: Option<ImageNaming>,

    /// How firmware reaches the device.
    pub image_delivery: ImageDelivery,

    /// Whether a completed upgrade reboots the device.
    pub reboots_after_upgrade: bool,

    /// Vendor-specific behavior.
    pub behavior: Option<Arc<dyn VendorBehavior>>,
}

impl DriverDefinition {
    /// Create a definition with command support only and exec sessions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::commands_only(),
            session_mode: SessionMode::Exec,
            failed_when_contains: vec![],
            on_open_commands: vec![],
            terminal_commands: vec![],
            image_naming: None,
            image_delivery: ImageDelivery::Push,
            reboots_after_upgrade: false,
            behavior: None,
        }
    }

    /// Set the capability set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Drive the device through a PTY shell with the given prompt.
    pub fn with_shell_prompt(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.session_mode = SessionMode::Shell {
            prompt: compile_prompt_pattern(pattern)?,
        };
        Ok(self)
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Add an on_open command.
    pub fn with_on_open_command(mut self, command: impl Into<String>) -> Self {
        self.on_open_commands.push(command.into());
        self
    }

    /// Add a batch-terminal command pattern.
    pub fn with_terminal_command(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.terminal_commands.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Set the image naming convention.
    pub fn with_image_naming(mut self, naming: ImageNaming) -> Self {
        self.image_naming = Some(naming);
        self
    }

    /// Set the image delivery method.
    pub fn with_image_delivery(mut self, delivery: ImageDelivery) -> Self {
        self.image_delivery = delivery;
        self
    }

    /// Mark that a completed upgrade reboots the device.
    pub fn with_reboot_after_upgrade(mut self) -> Self {
        self.reboots_after_upgrade = true;
        self
    }

    /// Set vendor behavior.
    pub fn with_behavior(mut self, behavior: Arc<dyn VendorBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Whether `command` ends the command batch.
    pub fn is_terminal_command(&self, command: &str) -> bool {
        let command = command.trim();
        self.terminal_commands.iter().any(|p| p.is_match(command))
    }

    /// First output line containing a failure pattern.
    pub fn detect_failure(&self, output: &str) -> Option<String> {
        output
            .lines()
            .find(|line| self.failed_when_contains.iter().any(|p| line.contains(p.as_str())))
            .map(|line| line.trim().to_string())
    }
}

impl fmt::Debug for DriverDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDefinition")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("session_mode", &self.session_mode)
            .field("failed_when_contains", &self.failed_when_contains)
            .field("on_open_commands", &self.on_open_commands)
            .field(
                "terminal_commands",
                &self.terminal_commands.iter().map(Regex::as_str).collect::<Vec<_>>(),
            )
            .field("image_naming", &self.image_naming)
            .field("image_delivery", &self.image_delivery)
            .field("reboots_after_upgrade", &self.reboots_after_upgrade)
            .field(
                "behavior",
                &self.behavior.as_ref().map(|_| "<VendorBehavior>"),
            )
            .finish()
    }
}
