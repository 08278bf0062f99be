//! Connection resolution
//!
//! Maps connection names to their configuration, enforcing each
//! connection's invariants at most once per process lifetime.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;
use crate::config::{Config, ConnectionConfig};

/// Resolves named connections from the loaded configuration
pub struct ConnectionRegistry {
    config: Arc<Config>,
    /// Connections that already passed validation
    validated: RwLock<HashSet<String>>,
}

impl ConnectionRegistry {
    /// Create a registry over the loaded configuration
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            validated: RwLock::new(HashSet::new()),
        }
    }

    /// The configured default connection name
    #[must_use]
    pub fn default_name(&self) -> &str {
        &self.config.default_connection
    }

    /// Whether a connection of this name is configured
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.config.connections.contains_key(name)
    }

    /// Resolve a connection by name, validating it on first use.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ConnectionNotFound`] when the name is not configured,
    /// [`crate::Error::Config`] when the connection fails validation.
    pub fn resolve(&self, name: &str) -> Result<&ConnectionConfig> {
        let connection = self.config.connection(name)?;

        if !self.validated.read().contains(name) {
            connection.validate(name)?;
            self.validated.write().insert(name.to_string());
        }

        Ok(connection)
    }

    /// Active connection name under the documented precedence:
    /// environment override (only when configured) > explicit selection >
    /// default.
    #[must_use]
    pub fn active_name<'a>(
        &'a self,
        explicit: Option<&'a str>,
        environment_override: Option<&'a str>,
    ) -> &'a str {
        if let Some(name) = environment_override {
            if self.contains(name) {
                return name;
            }
        }
        explicit.unwrap_or_else(|| self.default_name())
    }
}
