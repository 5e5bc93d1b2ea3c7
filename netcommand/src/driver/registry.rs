//! Registry mapping device models to drivers.

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;

use super::definition::DriverDefinition;
use super::{Driver, vendors};
use crate::error::{DriverError, Result};

/// Built-in drivers, initialized on first use and never modified.
static BUILTIN: LazyLock<Arc<DriverRegistry>> = LazyLock::new(|| {
    let mut registry = DriverRegistry::new();
    registry.register_builtin_drivers();
    Arc::new(registry)
});

/// Registry of drivers keyed by model.
///
/// Populate it completely, then share it; lookups take `&self` only.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: IndexMap<String, Driver>,
}

impl DriverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of built-in drivers.
    pub fn builtin() -> Arc<DriverRegistry> {
        Arc::clone(&BUILTIN)
    }

    fn register_builtin_drivers(&mut self) {
        for definition in [
            vendors::routeros::driver(),
            vendors::delln::driver(),
            vendors::dellos10::driver(),
            vendors::ios::driver(),
        ] {
            self.drivers
                .insert(definition.name.clone(), Driver::new(definition));
        }
    }

    /// Register a driver definition.
    pub fn register(&mut self, definition: DriverDefinition) -> Result<()> {
        if self.drivers.contains_key(&definition.name) {
            return Err(DriverError::AlreadyRegistered {
                model: definition.name.clone(),
            }
            .into());
        }
        self.drivers
            .insert(definition.name.clone(), Driver::new(definition));
        Ok(())
    }

    /// Driver for `model`.
    pub fn lookup(&self, model: &str) -> Result<Driver> {
        self.drivers.get(model).cloned().ok_or_else(|| {
            DriverError::UnknownModel {
                model: model.to_string(),
            }
            .into()
        })
    }

    /// Registered model names, in registration order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
