use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use ahash::AHashMap;
use courier_common::internal;
use serde::Deserialize;

use crate::{Check, RegistryError};

/// One configured check: the registered name plus free-form arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CheckConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

type Factory = dyn Fn(&CheckConfig) -> Result<Arc<dyn Check>, RegistryError> + Send + Sync;

/// Constructors for every known check, keyed by name.
///
/// Populated explicitly at startup; nothing registers itself.
#[derive(Default, Clone)]
pub struct CheckRegistry {
    factories: AHashMap<String, Arc<Factory>>,
}

impl Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names().collect::<Vec<_>>();
        names.sort_unstable();
        f.debug_struct("CheckRegistry")
            .field("checks", &names)
            .finish()
    }
}

impl CheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`.
    ///
    /// # Errors
    /// If something is already registered under that name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&CheckConfig) -> Result<Arc<dyn Check>, RegistryError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        internal!(level = DEBUG, check = %name, "Registered check");
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Construct the check described by `config`.
    ///
    /// # Errors
    /// If the name is unknown, or the factory rejects the arguments
    pub fn build(&self, config: &CheckConfig) -> Result<Arc<dyn Check>, RegistryError> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| RegistryError::UnknownCheck(config.name.clone()))?;

        factory(config)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
