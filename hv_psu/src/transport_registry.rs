//! Transport registry for bus transports.
//!
//! Provides a `TransportRegistry` struct for registering and retrieving
//! transport factories by name. Constructed at startup and passed by value;
//! there is no global state.

use hv_common::psu::config::PsuConfig;
use hv_common::psu::transport::{BusError, BusTransport};
use std::collections::HashMap;
use thiserror::Error;

/// Factory function type for opening a transport from configuration.
pub type TransportFactory = fn(&PsuConfig) -> Result<Box<dyn BusTransport>, BusError>;

/// Error types for transport creation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No transport registered under this name
    #[error("Transport not found: {0}")]
    NotFound(String),

    /// The factory failed to open the bus
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Registry of available bus transports.
pub struct TransportRegistry {
    factories: HashMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding all built-in transports.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_transports(&mut registry);
        registry
    }

    /// Register a transport factory.
    ///
    /// # Panics
    /// Panics if a transport with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: TransportFactory) {
        if self.factories.contains_key(name) {
            panic!("Transport '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a transport factory by name.
    pub fn get_factory(&self, name: &str) -> Option<TransportFactory> {
        self.factories.get(name).copied()
    }

    /// Open a transport by name.
    ///
    /// Blocks for as long as the factory needs to open and probe the bus.
    ///
    /// # Errors
    /// `TransportError::NotFound` if no transport with the given name is
    /// registered, `TransportError::Bus` if opening fails.
    pub fn create(
        &self,
        name: &str,
        config: &PsuConfig,
    ) -> Result<Box<dyn BusTransport>, TransportError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        Ok(factory(config)?)
    }

    /// List all registered transport names, sorted.
    pub fn list_transports(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
