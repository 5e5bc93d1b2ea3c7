//! Connection parameters and SSH options.

use std::fmt;
use std::path::PathBuf;

use regex::bytes::Regex;
use secrecy::SecretString;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For lab use only.
    Disabled,
}

/// SSH client options shared by every connection of a batch.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file (default: `~/.ssh/known_hosts`).
    pub known_hosts_path: Option<PathBuf>,

    /// Terminal width for PTY sessions.
    pub terminal_width: u32,

    /// Terminal height for PTY sessions.
    pub terminal_height: u32,

    /// Bytes from the end of the shell buffer searched for the prompt.
    pub search_depth: usize,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            terminal_width: 511,
            terminal_height: 24,
            search_depth: 1000,
        }
    }
}

/// Everything needed to reach and log in to one device.
#[derive(Debug)]
pub struct ConnectionParams {
    /// Target address (hostname or IP address).
    pub address: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,
}

impl ConnectionParams {
    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Authentication method for SSH connections.
#[derive(Debug)]
pub enum AuthMethod {
    /// No authentication (for testing only).
    None,

    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

impl AuthMethod {
    /// Short label for logs, never containing secret material.
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey { .. } => "publickey",
        }
    }
}

/// How commands are delivered to the device.
#[derive(Clone)]
pub enum SessionMode {
    /// One exec channel per command; stdout and stderr are separate.
    Exec,

    /// A single PTY shell; a command is complete when `prompt` shows up
    /// at the tail of the output.
    Shell {
        /// Pattern matching any prompt of the device.
        prompt: Regex,
    },
}

impl fmt::Debug for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Exec => f.write_str("Exec"),
            SessionMode::Shell { prompt } => f
                .debug_struct("Shell")
                .field("prompt", &prompt.as_str())
                .finish(),
        }
    }
}
