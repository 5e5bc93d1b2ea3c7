//! # netcommand
//!
//! Run command batches, version queries and firmware upgrades across a
//! fleet of network devices over SSH.
//!
//! ## Features
//!
//! - YAML inventory with nested groups and cascading options
//! - Host/group selection resolved before any device is touched
//! - Vendor drivers for MikroTik RouterOS, Dell N-series, Dell OS10 and Cisco IOS
//! - Bounded parallelism with one result per device, in inventory order
//! - Firmware image resolution with single-flight downloads
//! - Dry runs that validate everything without connecting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use netcommand::{BatchConfig, BatchScheduler, Operation};
//! use netcommand::image::ImageResolver;
//! use netcommand::inventory::{CredentialOverrides, Inventory, SelectionFilter, resolve};
//! use netcommand::transport::{SshOptions, SshTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netcommand::Error> {
//!     let inventory = Inventory::load("inventory.yaml", &CredentialOverrides::from_env())?;
//!     let targets = resolve(&inventory, &SelectionFilter::parse("edge,core1"))?;
//!
//!     let transport = Arc::new(SshTransport::new(SshOptions::default(), Duration::from_secs(30)));
//!     let images = Arc::new(ImageResolver::new(Duration::from_secs(600))?);
//!     let scheduler = BatchScheduler::new(transport, images)
//!         .with_config(BatchConfig::default().with_concurrency(4));
//!
//!     let report = scheduler.run_batch(&targets, Operation::upgrade("7.10.2")).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod image;
pub mod inventory;
pub mod operation;
pub mod parsers;
pub mod runner;
pub mod transport;
pub mod version;

// Re-export main types for convenience
pub use batch::{BatchReport, BatchScheduler, BatchStatus};
pub use config::{BatchConfig, DEFAULT_CONCURRENCY, RetryPolicy, Timeouts};
pub use driver::{Driver, DriverRegistry, Response};
pub use error::{Error, ErrorKind, Result};
pub use operation::Operation;
pub use runner::{SessionResult, SessionStatus};
