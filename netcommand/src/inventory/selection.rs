//! Resolving a selection filter to the target device list.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use super::{DeviceDescriptor, Inventory};
use crate::error::{Result, SelectionError};

/// Hostname and group tokens; empty selects every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionFilter {
    tokens: Vec<String>,
}

impl SelectionFilter {
    /// Filter selecting every device.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a comma separated selector such as `edge,core1`.
    ///
    /// Blank tokens are ignored.
    pub fn parse(selector: &str) -> Self {
        Self::from_tokens(selector.split(','))
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_all(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Resolve `filter` against `inventory`.
///
/// The result is in inventory order with each host at most once. Every
/// token must name a host or a group, otherwise nothing is selected and
/// `UnknownSelector` is returned. An empty result is `NoTargets`.
pub fn resolve(inventory: &Inventory, filter: &SelectionFilter) -> Result<Vec<Arc<DeviceDescriptor>>> {
    if let Some(token) = filter
        .tokens()
        .iter()
        .find(|t| inventory.device(t).is_none() && !inventory.has_group(t))
    {
        return Err(SelectionError::UnknownSelector {
            token: token.clone(),
        }
        .into());
    }

    let wanted: HashSet<&str> = filter.tokens().iter().map(String::as_str).collect();
    let mut seen = HashSet::new();

    let targets: Vec<_> = inventory
        .devices()
        .iter()
        .filter(|device| {
            filter.is_all()
                || wanted.contains(device.hostname.as_str())
                || device.groups.iter().any(|g| wanted.contains(g.as_str()))
        })
        .filter(|device| seen.insert(device.hostname.clone()))
        .cloned()
        .collect();

    if targets.is_empty() {
        return Err(SelectionError::NoTargets.into());
    }

    debug!(
        "Selected {} of {} host(s)",
        targets.len(),
        inventory.devices().len()
    );
    Ok(targets)
}
