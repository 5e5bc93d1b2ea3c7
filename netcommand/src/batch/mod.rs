//! Batch execution across many devices.
//!
//! The [`BatchScheduler`] validates a whole batch up front (drivers,
//! capabilities, images), then drives every target through a
//! [`SessionRunner`](crate::runner::SessionRunner) with bounded
//! parallelism and collects one result per target into a [`BatchReport`].

mod report;
mod scheduler;

pub use report::{BatchReport, BatchStatus, StatusCounts};
pub use scheduler::BatchScheduler;
