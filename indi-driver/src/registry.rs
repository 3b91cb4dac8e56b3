//! Named driver constructors
//!
//! Drivers are registered ahead of time under an identifier; loading a
//! driver by identifier builds a fresh instance from its factory.

use crate::driver::Driver;
use indi_core::{IndiError, IndiResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a new driver instance
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Identifier to factory map
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `identifier`, replacing any earlier entry
    pub fn register<F>(&mut self, identifier: &str, factory: F)
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(identifier.to_string(), Arc::new(factory))
            .is_some()
        {
            log::debug!("Driver factory {} replaced", identifier);
        }
    }

    /// Build a driver
    ///
    /// # Errors
    ///
    /// `UnknownDriver` if nothing is registered under `identifier`
    pub fn create(&self, identifier: &str) -> IndiResult<Box<dyn Driver>> {
        self.factories
            .get(identifier)
            .map(|factory| factory())
            .ok_or_else(|| IndiError::UnknownDriver(identifier.to_string()))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Registered identifiers in sorted order
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DriverContext;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Driver for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn init(&mut self, _ctx: &mut DriverContext) -> IndiResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = DriverRegistry::new();
        registry.register("focuser", || Box::new(Named("Focuser")));
        registry.register("wheel", || Box::new(Named("Filter Wheel")));

        assert!(registry.contains("focuser"));
        assert_eq!(registry.identifiers(), vec!["focuser", "wheel"]);
        assert_eq!(registry.create("wheel").unwrap().name(), "Filter Wheel");
        assert!(matches!(
            registry.create("mount"),
            Err(IndiError::UnknownDriver(id)) if id == "mount"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = DriverRegistry::new();
        registry.register("focuser", || Box::new(Named("Old")));
        registry.register("focuser", || Box::new(Named("New")));
        assert_eq!(registry.identifiers().len(), 1);
        assert_eq!(registry.create("focuser").unwrap().name(), "New");
    }
}
