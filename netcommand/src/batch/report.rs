use std::fmt::{self, Write as _};
use std::time::Duration;

use crate::operation::Operation;
use crate::runner::{SessionResult, SessionStatus};

/// Overall outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    Failure,
}

/// Number of results per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

/// Results of one batch, in inventory order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    operation: Operation,
    dry_run: bool,
    results: Vec<SessionResult>,
    elapsed: Duration,
}

impl BatchReport {
    pub fn new(operation: Operation, dry_run: bool, results: Vec<SessionResult>, elapsed: Duration) -> Self {
        Self {
            operation,
            dry_run,
            results,
            elapsed,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn results(&self) -> &[SessionResult] {
        &self.results
    }

    /// Result for `hostname`.
    pub fn get(&self, hostname: &str) -> Option<&SessionResult> {
        self.results.iter().find(|r| r.hostname() == hostname)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// `Failure` if any device failed.
    pub fn status(&self) -> BatchStatus {
        if self.results.iter().any(SessionResult::is_failed) {
            BatchStatus::Failure
        } else {
            BatchStatus::Success
        }
    }

    /// Whether any device was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status() == SessionStatus::Cancelled)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in &self.results {
            match result.status() {
                SessionStatus::Success => counts.success += 1,
                SessionStatus::Failed => counts.failed += 1,
                SessionStatus::Skipped => counts.skipped += 1,
                SessionStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Human readable summary: transcripts for command batches, then one
    /// row per device and the totals.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if self.dry_run {
            out.push_str("=== DRY RUN: no device was contacted ===\n\n");
        }

        for result in &self.results {
            render_details(&mut out, result);
        }

        let show_versions = matches!(self.operation, Operation::Upgrade(_) | Operation::Version);
        let host_width = self
            .results
            .iter()
            .map(|r| r.hostname().len())
            .max()
            .unwrap_or(0)
            .max("HOSTNAME".len());
        let version_width = self
            .results
            .iter()
            .flat_map(|r| [r.initial_version(), r.final_version()])
            .flatten()
            .map(str::len)
            .max()
            .unwrap_or(0)
            .max("BEFORE".len());

        let _ = write!(out, "{:<10} {:<host_width$}", "STATUS", "HOSTNAME");
        if show_versions {
            let _ = write!(out, " {:<version_width$} {:<version_width$}", "BEFORE", "AFTER");
        }
        out.push_str(" DETAIL\n");

        for result in &self.results {
            let _ = write!(out, "{:<10} {:<host_width$}", result.status(), result.hostname());
            if show_versions {
                let _ = write!(
                    out,
                    " {:<version_width$} {:<version_width$}",
                    result.initial_version().unwrap_or("-"),
                    result.final_version().unwrap_or("-")
                );
            }
            match result.error() {
                Some(error) => {
                    let _ = writeln!(out, " {error}");
                }
                None => out.push('\n'),
            }
        }

        let counts = self.counts();
        let _ = writeln!(
            out,
            "\n{} device(s): {} succeeded, {} failed, {} skipped, {} cancelled ({:.1?})",
            self.results.len(),
            counts.success,
            counts.failed,
            counts.skipped,
            counts.cancelled,
            self.elapsed
        );
        out
    }
}

fn render_details(out: &mut String, result: &SessionResult) {
    if result.transcript().is_empty() && result.notes().is_empty() {
        return;
    }

    let _ = writeln!(out, "--- {} ({}) ---", result.hostname(), result.model());
    for response in result.transcript() {
        let _ = writeln!(out, "> {}", response.command);
        for line in response.lines() {
            let _ = writeln!(out, "  {line}");
        }
        if let Some(message) = &response.failure_message {
            let _ = writeln!(out, "  !! {message}");
        }
    }
    for note in result.notes() {
        let _ = writeln!(out, "# {note}");
    }
    out.push('\n');
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
