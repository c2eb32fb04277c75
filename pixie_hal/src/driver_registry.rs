//! Driver registry for module hardware backends.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving backend
//! factories. The crate layer asks it for one backend per probed device.

use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::hw::{HardwareFactory, ModuleHardware};
use std::collections::HashMap;

/// Registry of available backends.
///
/// Constructed at startup, populated via `register()`, and handed to the
/// crate. No global state.
pub struct DriverRegistry {
    factories: HashMap<&'static str, HardwareFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_drivers(&mut registry);
        registry
    }

    /// Register a backend factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: HardwareFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a factory by name.
    pub fn get_factory(&self, name: &str) -> Option<HardwareFactory> {
        self.factories.get(name).copied()
    }

    /// Create a backend instance by name.
    ///
    /// # Errors
    /// `ConfigInvalid` if no backend with the given name is registered.
    pub fn create_driver(&self, name: &str) -> Result<Box<dyn ModuleHardware>> {
        let factory = self.get_factory(name).ok_or_else(|| {
            PixieError::new(ErrorCode::ConfigInvalid, format!("driver not found: {name}"))
        })?;
        Ok(factory())
    }

    /// List all registered backend names.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedModule;

    fn create_test_driver() -> Box<dyn ModuleHardware> {
        Box::new(SimulatedModule::new())
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = DriverRegistry::new();
        reg.register("test_driver", create_test_driver);

        let driver = reg.create_driver("test_driver").expect("should create");
        assert_eq!(driver.name(), "simulation");
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        let err = reg.create_driver("nonexistent").err().unwrap();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn registry_list_drivers() {
        let mut reg = DriverRegistry::with_builtin();
        reg.register("beta", create_test_driver);

        let mut names = reg.list_drivers();
        names.sort();
        assert_eq!(names, vec!["beta", "simulation"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register("dup", create_test_driver);
        reg.register("dup", create_test_driver);
    }
}
