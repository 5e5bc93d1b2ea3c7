//! The single operation applied to every target of a batch.

use std::fmt;

/// Operation requested for a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Send commands in order.
    Commands(CommandBatch),

    /// Upgrade firmware to a version.
    Upgrade(UpgradeRequest),

    /// Read the running software version.
    Version,
}

impl Operation {
    /// Command batch from a list of commands.
    pub fn commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::Commands(CommandBatch::new(commands))
    }

    /// Upgrade request for `version`.
    pub fn upgrade(version: impl Into<String>) -> Self {
        Operation::Upgrade(UpgradeRequest {
            version: version.into(),
        })
    }

    /// Short name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Commands(_) => "commands",
            Operation::Upgrade(_) => "upgrade",
            Operation::Version => "version query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Commands(batch) => write!(f, "{} command(s)", batch.len()),
            Operation::Upgrade(request) => write!(f, "upgrade to {}", request.version),
            Operation::Version => f.write_str("version query"),
        }
    }
}

/// Ordered commands sent to each device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<String>,
}

impl CommandBatch {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a commands file: one command per line, blank lines skipped.
    pub fn from_lines(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.trim().is_empty()),
        )
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Target firmware version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub version: String,
}
