//! Error types for netcommand.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for netcommand operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Inventory loading errors
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Target selection errors
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Driver-level errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Firmware image errors
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Unexpected fault inside a session runner
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Inventory errors.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Inventory file could not be read
    #[error("Failed to read inventory '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Inventory document is not valid YAML for the expected schema
    #[error("Invalid inventory document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Host has no model configured anywhere in its option chain
    #[error("Host '{host}' has no model configured")]
    MissingModel { host: String },

    /// Option value has the wrong shape
    #[error("Host '{host}': invalid value for '{key}': {message}")]
    InvalidOption {
        host: String,
        key: String,
        message: String,
    },
}

/// Target selection errors.
#[derive(Error, Debug)]
pub enum SelectionError {
    /// A selector token matched neither a hostname nor a group
    #[error("Unknown host or group '{token}'")]
    UnknownSelector { token: String },

    /// Selection resolved to zero devices
    #[error("No target devices selected")]
    NoTargets,
}

/// Transport layer errors (SSH connection, authentication, file transfer).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key not present in known_hosts (strict mode)
    #[error("Unknown host key for {host}:{port}")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// File transfer stopped before all bytes were acknowledged
    #[error("Transfer of '{path}' interrupted: {message}")]
    TransferInterrupted { path: PathBuf, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Driver layer errors (command execution, upgrade steps).
#[derive(Error, Debug)]
pub enum DriverError {
    /// No driver registered for the model
    #[error("Unknown device model '{model}'")]
    UnknownModel { model: String },

    /// A driver for the model is already registered
    #[error("Driver for model '{model}' is already registered")]
    AlreadyRegistered { model: String },

    /// Driver does not declare the capability required by the operation
    #[error("Model '{model}' does not support {operation}")]
    UnsupportedOperation { model: String, operation: String },

    /// Command output matched a failure pattern or carried stderr
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Output could not be interpreted
    #[error("Unexpected output for '{command}': {message}")]
    UnexpectedOutput { command: String, message: String },

    /// Vendor upgrade step failed
    #[error("Upgrade failed: {message}")]
    UpgradeFailed { message: String },

    /// Device reports a newer version than requested
    #[error("Refusing downgrade from '{current}' to '{requested}'")]
    DowngradeRefused { current: String, requested: String },

    /// Version after upgrade differs from the requested one
    #[error("Device reports version '{found}' after upgrade, expected '{expected}'")]
    VersionNotApplied { expected: String, found: String },

    /// The device is not the platform the image was built for
    #[error("Device platform '{reported}' does not match image '{image}' built for '{expected}'")]
    PlatformMismatch {
        reported: String,
        expected: String,
        image: String,
    },
}

/// Firmware image errors.
#[derive(Error, Debug)]
pub enum ImageError {
    /// Image not present locally and not obtainable remotely
    #[error("Image '{filename}' not found ({searched})")]
    NotFound { filename: String, searched: String },

    /// Version embedded in the filename differs from the requested version
    #[error("Image '{filename}' carries version {found}, expected '{expected}'")]
    VersionMismatch {
        filename: String,
        expected: String,
        found: FoundVersion,
    },

    /// Target has no platform configured, so no filename can be derived
    #[error("Host '{host}' has no platform configured")]
    MissingPlatform { host: String },

    /// Model has no image naming convention
    #[error("Model '{model}' has no image naming convention")]
    NoNaming { model: String },

    /// Download from the remote source failed
    #[error("Download of '{url}' failed: {message}")]
    Download { url: String, message: String },

    /// Local filesystem error
    #[error("Image I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Version parsed out of an image filename, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundVersion(pub Option<String>);

impl fmt::Display for FoundVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => write!(f, "'{v}'"),
            None => write!(f, "<unparseable>"),
        }
    }
}

/// Error taxonomy surfaced in session results and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownSelector,
    NoTargets,
    UnknownModel,
    UnsupportedOperation,
    ConnectionFailed,
    AuthFailed,
    Timeout,
    CommandFailed,
    ImageNotFound,
    VersionMismatch,
    PlatformMismatch,
    TransferInterrupted,
    InternalError,
    InvalidInventory,
}

impl ErrorKind {
    /// Stable identifier used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownSelector => "UnknownSelector",
            Self::NoTargets => "NoTargets",
            Self::UnknownModel => "UnknownModel",
            Self::UnsupportedOperation => "UnsupportedOperation",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::AuthFailed => "AuthFailed",
            Self::Timeout => "Timeout",
            Self::CommandFailed => "CommandFailed",
            Self::ImageNotFound => "ImageNotFound",
            Self::VersionMismatch => "VersionMismatch",
            Self::PlatformMismatch => "PlatformMismatch",
            Self::TransferInterrupted => "TransferInterrupted",
            Self::InternalError => "InternalError",
            Self::InvalidInventory => "InvalidInventory",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Inventory(_) => ErrorKind::InvalidInventory,
            Error::Selection(SelectionError::UnknownSelector { .. }) => ErrorKind::UnknownSelector,
            Error::Selection(SelectionError::NoTargets) => ErrorKind::NoTargets,
            Error::Transport(e) => match e {
                TransportError::AuthenticationFailed { .. } | TransportError::Key(_) => {
                    ErrorKind::AuthFailed
                }
                TransportError::Timeout(_) => ErrorKind::Timeout,
                TransportError::TransferInterrupted { .. } => ErrorKind::TransferInterrupted,
                _ => ErrorKind::ConnectionFailed,
            },
            Error::Driver(e) => match e {
                DriverError::UnknownModel { .. } => ErrorKind::UnknownModel,
                DriverError::AlreadyRegistered { .. } => ErrorKind::InternalError,
                DriverError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
                DriverError::DowngradeRefused { .. } | DriverError::VersionNotApplied { .. } => {
                    ErrorKind::VersionMismatch
                }
                DriverError::PlatformMismatch { .. } => ErrorKind::PlatformMismatch,
                _ => ErrorKind::CommandFailed,
            },
            Error::Image(e) => match e {
                ImageError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
                _ => ErrorKind::ImageNotFound,
            },
            Error::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Whether the error was raised before anything was sent to the device,
    /// and a fresh attempt could plausibly succeed.
    pub fn is_transient_connect(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConnectionFailed | ErrorKind::Timeout)
    }

    /// Whether the error means the remote end went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(
                TransportError::Disconnected | TransportError::Ssh(_) | TransportError::Timeout(_)
            )
        )
    }
}

/// Cloneable snapshot of an error, stored in session results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Taxonomy bucket.
    pub kind: ErrorKind,

    /// Human readable message.
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type alias using netcommand's Error.
pub type Result<T> = std::result::Result<T, Error>;
