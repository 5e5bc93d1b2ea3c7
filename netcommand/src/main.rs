//! netcommand: run commands and firmware upgrades across a device fleet.
//!
//! # Usage
//!
//! ```bash
//! netcommand -l edge inventory.yaml command commands.txt
//! netcommand -C inventory.yaml update 7.10.2
//! netcommand -l core1 inventory.yaml version
//! ```
//!
//! Exit status: 0 when every device succeeded, 1 when any device failed,
//! 2 when the batch was rejected before any device was contacted, 130
//! when interrupted.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{debug, warn};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use netcommand::image::ImageResolver;
use netcommand::inventory::{CredentialOverrides, Inventory, SelectionFilter, resolve};
use netcommand::operation::CommandBatch;
use netcommand::transport::SshTransport;
use netcommand::{BatchScheduler, BatchStatus, Operation};

const EXIT_FAILURE: u8 = 1;
const EXIT_REJECTED: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let overrides = credential_overrides(&cli)?;
    let inventory = Inventory::load(&cli.inventory, &overrides)?;
    let targets = resolve(&inventory, &SelectionFilter::parse(&cli.limit))?;
    debug!("{} of {} device(s) selected", targets.len(), inventory.len());

    let operation = match &cli.command {
        Commands::Command { file } => {
            let text = std::fs::read_to_string(file)
                .map_err(|e| format!("Failed to read '{}': {e}", file.display()))?;
            let batch = CommandBatch::from_lines(&text);
            if batch.is_empty() {
                return Err(format!("No commands in '{}'", file.display()).into());
            }
            Operation::Commands(batch)
        }
        Commands::Update { version } => Operation::upgrade(version.as_str()),
        Commands::Version => Operation::Version,
    };

    let config = cli.batch_config();
    let transport = Arc::new(SshTransport::new(cli.ssh_options(), config.timeouts.connect));
    let images = Arc::new(ImageResolver::new(config.timeouts.transfer)?);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let scheduler = BatchScheduler::new(transport, images)
        .with_config(config)
        .with_cancellation(cancel.clone());
    let report = scheduler.run_batch(&targets, operation).await?;

    print!("{report}");

    if cancel.is_cancelled() {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(match report.status() {
        BatchStatus::Success => ExitCode::SUCCESS,
        BatchStatus::Failure => ExitCode::from(EXIT_FAILURE),
    })
}

/// Credentials from the environment, replaced by prompted ones on request.
fn credential_overrides(cli: &Cli) -> std::io::Result<CredentialOverrides> {
    let mut overrides = CredentialOverrides::from_env();
    if cli.prompt_password {
        overrides.password = Some(SecretString::from(rpassword::prompt_password("Password: ")?));
    }
    if cli.prompt_key_password {
        overrides.key_passphrase = Some(SecretString::from(rpassword::prompt_password(
            "SSH key password: ",
        )?));
    }
    Ok(overrides)
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, cancelling remaining devices");
        cancel.cancel();
    }
}
