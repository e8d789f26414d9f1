//! Name-to-factory registry for access checkers.
//!
//! The registry is assembled once at startup with [`CheckerRegistryBuilder`]
//! and is immutable afterwards, so lookups need no locking.
//!
//! # Example
//!
//! ```ignore
//! let registry = CheckerRegistry::builder()
//!     .register("demo", Arc::new(AllowAllCheckerFactory::new()))?
//!     .build();
//! let factory = registry.get("demo")?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::AccessResult;
use crate::checker::AccessCheckerFactory;
use crate::checkers::allow_all::{self, AllowAllCheckerFactory};
use crate::checkers::patient::{self, PatientCheckerFactory};
use crate::config::AccessConfig;
use crate::error::AccessError;

/// Immutable lookup of checker factories by name.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    factories: Arc<HashMap<String, Arc<dyn AccessCheckerFactory>>>,
}

impl CheckerRegistry {
    /// Start assembling a registry.
    #[must_use]
    pub fn builder() -> CheckerRegistryBuilder {
        CheckerRegistryBuilder::default()
    }

    /// Registry with the checkers shipped in this crate.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in names; the `Result` mirrors
    /// [`CheckerRegistryBuilder::register`].
    pub fn builtin(config: &AccessConfig) -> AccessResult<Self> {
        Ok(Self::builder()
            .register(allow_all::NAME, Arc::new(AllowAllCheckerFactory::new()))?
            .register(
                patient::NAME,
                Arc::new(PatientCheckerFactory::from_config(&config.claims)),
            )?
            .build())
    }

    /// Look up a factory by name.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownChecker`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> AccessResult<Arc<dyn AccessCheckerFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| AccessError::unknown_checker(name))
    }

    /// Returns true if a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no factories are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("checkers", &self.names())
            .finish()
    }
}

/// Builder for [`CheckerRegistry`].
#[derive(Default)]
pub struct CheckerRegistryBuilder {
    factories: HashMap<String, Arc<dyn AccessCheckerFactory>>,
}

impl CheckerRegistryBuilder {
    /// Register a factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::DuplicateChecker`] if `name` is already taken;
    /// the first registration is kept. Empty names are a configuration error.
    pub fn register(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn AccessCheckerFactory>,
    ) -> AccessResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AccessError::configuration("checker name must not be empty"));
        }
        if self.factories.contains_key(&name) {
            return Err(AccessError::duplicate_checker(name));
        }

        tracing::debug!(checker = %name, "Registered access checker");
        self.factories.insert(name, factory);
        Ok(self)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> CheckerRegistry {
        CheckerRegistry {
            factories: Arc::new(self.factories),
        }
    }
}
