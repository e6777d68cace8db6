use crate::error::{Result, SchedulerError};
use crate::framework::interface::Plugin;
use crate::framework::profile::PluginArgs;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a plugin instance from its profile arguments
pub type PluginFactory = Box<dyn Fn(&PluginArgs) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Plugin name to factory
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, PluginFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin
    pub fn in_tree() -> Self {
        let mut registry = Self::new();
        for (name, factory) in crate::plugins::in_tree_factories() {
            // Built-in names are distinct
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&PluginArgs) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(SchedulerError::config(
                format!("plugin {} is already registered", name),
                "Register each plugin name once",
            ));
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Instantiate a registered plugin
    pub fn build(&self, name: &str, args: &PluginArgs) -> Result<Arc<dyn Plugin>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            SchedulerError::config(
                format!("unknown plugin {}", name),
                format!("Known plugins: {}", self.names().join(", ")),
            )
        })?;
        factory(args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Decode plugin arguments, using `T::default()` when none are given
pub fn decode_args<T>(plugin: &str, args: &PluginArgs) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if args.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(args.clone()).map_err(|e| {
        SchedulerError::config(
            format!("invalid arguments for plugin {}: {}", plugin, e),
            "Check the plugin's args in the profile",
        )
    })
}
