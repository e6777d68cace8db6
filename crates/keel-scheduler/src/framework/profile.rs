use crate::cache::{CacheConfig, StoreConfig};
use crate::error::{Result, SchedulerError};
use crate::framework::parallelize::DEFAULT_PARALLELISM;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Free-form plugin arguments, decoded by the plugin's factory
pub type PluginArgs = serde_yaml::Value;

/// How to choose among nodes with the same best score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    /// Lexically smallest node name
    #[default]
    LowestName,
    /// Lexically largest node name
    HighestName,
}

/// One enabled plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    pub name: String,
    /// Multiplier of this plugin's normalized scores
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub args: PluginArgs,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: default_weight(),
            args: PluginArgs::Null,
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }
}

fn default_weight() -> i64 {
    1
}

/// Auxiliary store settings, TTL in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreProfile {
    pub name: String,
    pub ttl: u64,
}

/// Cache settings, durations in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheProfile {
    pub assumed_pod_ttl: u64,
    pub cleanup_period: u64,
    pub stores: Vec<StoreProfile>,
}

impl Default for CacheProfile {
    fn default() -> Self {
        Self {
            assumed_pod_ttl: 30,
            cleanup_period: 1,
            stores: Vec::new(),
        }
    }
}

/// Scheduler configuration: enabled plugins and their ordering, worker count,
/// tie-breaking and cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerProfile {
    /// Plugins in registration order
    pub plugins: Vec<PluginConfig>,
    pub parallelism: usize,
    pub tie_breaker: TieBreaker,
    pub cache: CacheProfile,
}

impl Default for SchedulerProfile {
    fn default() -> Self {
        Self {
            plugins: crate::plugins::DEFAULT_PLUGINS
                .iter()
                .map(|name| PluginConfig::new(*name))
                .collect(),
            parallelism: DEFAULT_PARALLELISM,
            tie_breaker: TieBreaker::default(),
            cache: CacheProfile::default(),
        }
    }
}

impl SchedulerProfile {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let profile: Self = serde_yaml::from_str(data).map_err(|e| {
            SchedulerError::config(
                format!("failed to parse scheduler profile: {}", e),
                "Check the profile YAML against the documented fields",
            )
        })?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading scheduler profile from {}", path.display());
        let data = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::config(
                format!("failed to read {}: {}", path.display(), e),
                "Pass an existing, readable profile file",
            )
        })?;
        Self::from_yaml_str(&data)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(SchedulerError::config(
                "parallelism must be positive",
                "Set parallelism to 1 or more",
            ));
        }

        let mut names = HashSet::new();
        for plugin in &self.plugins {
            if plugin.weight < 1 {
                return Err(SchedulerError::config(
                    format!("plugin {} has weight {}", plugin.name, plugin.weight),
                    "Plugin weights must be 1 or more",
                ));
            }
            if !names.insert(plugin.name.as_str()) {
                return Err(SchedulerError::config(
                    format!("plugin {} is enabled twice", plugin.name),
                    "List each plugin once",
                ));
            }
        }

        if self.cache.cleanup_period == 0 {
            return Err(SchedulerError::config(
                "cache.cleanup_period must be positive",
                "Set the sweep period to at least one second",
            ));
        }

        let mut stores = HashSet::new();
        for store in &self.cache.stores {
            if !stores.insert(store.name.as_str()) {
                return Err(SchedulerError::config(
                    format!("store {} is configured twice", store.name),
                    "Give every auxiliary store a unique name",
                ));
            }
        }

        Ok(())
    }

    /// Cache configuration described by this profile
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            assumed_pod_ttl: Duration::from_secs(self.cache.assumed_pod_ttl),
            cleanup_period: Duration::from_secs(self.cache.cleanup_period),
            stores: self
                .cache
                .stores
                .iter()
                .map(|s| StoreConfig::new(s.name.clone(), Duration::from_secs(s.ttl)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = SchedulerProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.parallelism, 16);
        assert_eq!(profile.tie_breaker, TieBreaker::LowestName);
        assert!(profile.plugins.iter().any(|p| p.name == "LessTopologyKey"));
    }

    #[test]
    fn test_parse_full_profile() {
        let yaml = r#"
parallelism: 4
tie_breaker: highest_name
plugins:
  - name: NodeResourcesFit
  - name: LeastAllocated
    weight: 2
    args:
      cpu_weight: 3
cache:
  assumed_pod_ttl: 10
  stores:
    - name: PreemptionStore
      ttl: 60
"#;
        let profile = SchedulerProfile::from_yaml_str(yaml).unwrap();
        assert_eq!(profile.parallelism, 4);
        assert_eq!(profile.tie_breaker, TieBreaker::HighestName);
        assert_eq!(profile.plugins.len(), 2);
        assert_eq!(profile.plugins[0].weight, 1);
        assert_eq!(profile.plugins[1].weight, 2);
        assert!(profile.plugins[1].args.get("cpu_weight").is_some());

        let cache = profile.cache_config();
        assert_eq!(cache.assumed_pod_ttl, Duration::from_secs(10));
        assert_eq!(cache.cleanup_period, Duration::from_secs(1));
        assert_eq!(cache.stores, vec![StoreConfig::new("PreemptionStore", Duration::from_secs(60))]);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for yaml in [
            "parallelism: 0",
            "plugins: [{name: A, weight: 0}]",
            "plugins: [{name: A}, {name: A}]",
            "cache: {cleanup_period: 0}",
            "cache: {stores: [{name: S, ttl: 1}, {name: S, ttl: 2}]}",
            "unknown_field: true",
        ] {
            let err = SchedulerProfile::from_yaml_str(yaml).unwrap_err();
            assert!(
                matches!(err, SchedulerError::Config { .. }),
                "{} gave {:?}",
                yaml,
                err
            );
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "plugins:\n  - name: NodeSelector\nparallelism: 2").unwrap();

        let profile = SchedulerProfile::from_file(file.path()).unwrap();
        assert_eq!(profile.parallelism, 2);
        assert_eq!(profile.plugins, vec![PluginConfig::new("NodeSelector")]);

        assert!(SchedulerProfile::from_file("/nonexistent/profile.yaml").is_err());
    }
}
