use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use netcommand::config::{BatchConfig, DEFAULT_CONCURRENCY, RetryPolicy, Timeouts};
use netcommand::transport::{HostKeyVerification, SshOptions};

/// Host key policy (CLI wrapper for HostKeyVerification)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum HostKeyChecking {
    /// Only connect to hosts already in known_hosts
    Strict,
    /// Learn unknown hosts, reject changed keys
    #[default]
    AcceptNew,
    /// Do not check host keys
    Off,
}

impl From<HostKeyChecking> for HostKeyVerification {
    fn from(policy: HostKeyChecking) -> Self {
        match policy {
            HostKeyChecking::Strict => HostKeyVerification::Strict,
            HostKeyChecking::AcceptNew => HostKeyVerification::AcceptNew,
            HostKeyChecking::Off => HostKeyVerification::Disabled,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "netcommand")]
#[command(about = "Run commands and firmware upgrades across network devices")]
#[command(version)]
pub struct Cli {
    /// Debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Prompt for the SSH key passphrase
    #[arg(short = 'K', long)]
    pub prompt_key_password: bool,

    /// Prompt for the SSH password
    #[arg(short = 'P', long)]
    pub prompt_password: bool,

    /// Do not start further devices after the first failure
    #[arg(short = 'S', long)]
    pub stop_on_error: bool,

    /// Limit to hosts/groups (comma separated)
    #[arg(short, long, default_value = "", value_name = "HOSTS")]
    pub limit: String,

    /// Check mode: validate and preview, don't connect to any device
    #[arg(short = 'C', long, visible_alias = "dry-run")]
    pub check: bool,

    /// Devices handled in parallel
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY, value_name = "N")]
    pub concurrency: usize,

    /// Connection retries per device
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub retries: u32,

    /// Connect and command timeout in seconds
    #[arg(short = 't', long, default_value_t = 30, value_name = "SECS")]
    pub timeout: u64,

    /// Host key verification
    #[arg(long, value_enum, default_value = "accept-new")]
    pub host_key_checking: HostKeyChecking,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long, value_name = "FILE")]
    pub known_hosts: Option<PathBuf>,

    /// Inventory file
    pub inventory: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send the commands in FILE, one per line, to every device
    #[command(visible_alias = "commands")]
    Command {
        /// File containing commands
        file: PathBuf,
    },

    /// Upgrade every device to VERSION
    Update {
        /// Image version
        version: String,
    },

    /// Show the running software version
    Version,
}

impl Cli {
    pub fn timeouts(&self) -> Timeouts {
        let step = Duration::from_secs(self.timeout.max(1));
        Timeouts {
            connect: step,
            command: step,
            ..Timeouts::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_concurrency(self.concurrency)
            .with_dry_run(self.check)
            .with_stop_on_error(self.stop_on_error)
            .with_retry(RetryPolicy::new(self.retries, Duration::from_secs(5)))
            .with_timeouts(self.timeouts())
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            host_key_verification: self.host_key_checking.into(),
            known_hosts_path: self.known_hosts.clone(),
            ..SshOptions::default()
        }
    }
}
