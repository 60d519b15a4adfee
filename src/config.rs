//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{FailurePolicy, Policy, PolicySet, DEFAULT_SHARDS};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__LIMITER__SHARDS`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Limiter and store configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Background sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Named policies, layered over the built-in `default` and `strict`
    #[serde(default)]
    pub policies: BTreeMap<String, Policy>,
}

/// Which window store to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// DashMap store, full-scan sweeps
    Memory,
    /// Sharded store with expiry indexes
    #[default]
    Indexed,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Store implementation
    #[serde(default)]
    pub store: StoreKind,

    /// Shard count for the indexed store
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Decision to apply when the store is unavailable. Unset means the error
    /// is returned to the caller.
    #[serde(default)]
    pub on_store_error: Option<FailurePolicy>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            shards: default_shards(),
            on_store_error: None,
        }
    }
}

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

/// Sweeper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether to run the periodic sweeper
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Milliseconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_ms: default_sweep_interval(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30_000
}

impl SweeperConfig {
    /// The sweep interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Settings read from `TURNSTILE__*` environment variables. Unset fields
/// leave the file or default value in place.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    limiter: LimiterOverrides,
    sweeper: SweeperOverrides,
    policies: BTreeMap<String, Policy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimiterOverrides {
    store: Option<StoreKind>,
    shards: Option<usize>,
    on_store_error: Option<FailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SweeperOverrides {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

impl EnvOverrides {
    fn from_env() -> Result<Self> {
        let overrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(overrides)
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__<SECTION>__<KEY>` environment overrides.
    ///
    /// The file is always parsed as YAML and keeps policy names exactly as
    /// written. Environment keys are case-insensitive, so a policy overridden
    /// through the environment is stored under its lowercased name.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                Self::parse_yaml(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };

        config.apply(EnvOverrides::from_env()?);
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Configuration(e.to_string()))
    }

    fn apply(&mut self, overrides: EnvOverrides) {
        let EnvOverrides {
            limiter,
            sweeper,
            policies,
        } = overrides;

        if let Some(store) = limiter.store {
            self.limiter.store = store;
        }
        if let Some(shards) = limiter.shards {
            self.limiter.shards = shards;
        }
        if limiter.on_store_error.is_some() {
            self.limiter.on_store_error = limiter.on_store_error;
        }
        if let Some(enabled) = sweeper.enabled {
            self.sweeper.enabled = enabled;
        }
        if let Some(interval_ms) = sweeper.interval_ms {
            self.sweeper.interval_ms = interval_ms;
        }
        self.policies.extend(policies);
    }

    /// Check settings that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.shards == 0 {
            return Err(TurnstileError::Configuration(
                "limiter.shards must be greater than 0".to_string(),
            ));
        }
        if self.sweeper.enabled && self.sweeper.interval_ms == 0 {
            return Err(TurnstileError::Configuration(
                "sweeper.interval_ms must be greater than 0".to_string(),
            ));
        }
        self.policy_set().map(|_| ())
    }

    /// Built-in policies with the configured ones layered on top.
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::with_overrides(
            self.policies
                .iter()
                .map(|(name, policy)| (name.clone(), *policy)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.limiter.store, StoreKind::Indexed);
        assert_eq!(config.limiter.shards, DEFAULT_SHARDS);
        assert_eq!(config.limiter.on_store_error, None);
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TurnstileConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limiter:
  store: memory
  shards: 16
  on_store_error: closed
sweeper:
  enabled: false
  interval_ms: 5000
policies:
  login:
    max_requests: 3
    window_ms: 300000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.store, StoreKind::Memory);
        assert_eq!(config.limiter.shards, 16);
        assert_eq!(config.limiter.on_store_error, Some(FailurePolicy::Closed));
        assert!(!config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_ms, 5000);

        let policies = config.policy_set().unwrap();
        assert_eq!(policies.get("login").unwrap().max_requests, 3);
        assert_eq!(policies.get("default").unwrap(), Policy::DEFAULT);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
policies:
  broken:
    max_requests: 5
    window_ms: 0
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Configuration(_)));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let yaml = "limiter:\n  shards: 0\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_interval_rejected_only_when_enabled() {
        assert!(TurnstileConfig::from_yaml("sweeper:\n  interval_ms: 0\n").is_err());
        assert!(
            TurnstileConfig::from_yaml("sweeper:\n  enabled: false\n  interval_ms: 0\n").is_ok()
        );
    }

    #[test]
    fn test_unknown_store_kind_rejected() {
        assert!(TurnstileConfig::from_yaml("limiter:\n  store: redis\n").is_err());
    }

    #[test]
    fn test_load_file_and_env() {
        let path = std::env::temp_dir().join(format!(
            "turnstile-config-test-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "limiter:\n  store: memory\npolicies:\n  upload:\n    max_requests: 2\n    window_ms: 1000\n",
        )
        .unwrap();

        std::env::set_var("TURNSTILE__SWEEPER__INTERVAL_MS", "1234");
        let config = TurnstileConfig::load(Some(&path));
        std::env::remove_var("TURNSTILE__SWEEPER__INTERVAL_MS");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.limiter.store, StoreKind::Memory);
        assert_eq!(config.sweeper.interval_ms, 1234);
        assert_eq!(config.policy_set().unwrap().get("upload").unwrap().max_requests, 2);
    }

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_file_without_extension() {
        let path = write_temp(
            "turnstile-conf",
            "policies:\n  once:\n    max_requests: 1\n    window_ms: 60000\n",
        );
        let config = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let policies = config.unwrap().policy_set().unwrap();
        assert_eq!(policies.get("once").unwrap().max_requests, 1);
    }

    #[test]
    fn test_load_keeps_policy_name_case() {
        let yaml = "policies:\n  Login:\n    max_requests: 1\n    window_ms: 60000\n";
        let path = write_temp("turnstile-mixed-case.yaml", yaml);
        let loaded = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        let parsed = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(loaded.policies, parsed.policies);

        let policies = loaded.policy_set().unwrap();
        assert_eq!(policies.get("Login").unwrap().max_requests, 1);
        assert!(policies.get("login").is_err());
    }

    #[test]
    fn test_env_overrides_apply_over_file_values() {
        let mut config = TurnstileConfig::from_yaml("limiter:\n  shards: 4\n").unwrap();
        config.apply(EnvOverrides {
            limiter: LimiterOverrides {
                on_store_error: Some(FailurePolicy::Open),
                ..Default::default()
            },
            sweeper: SweeperOverrides {
                enabled: Some(false),
                ..Default::default()
            },
            policies: BTreeMap::from([("burst".to_string(), Policy::STRICT)]),
        });

        assert_eq!(config.limiter.shards, 4);
        assert_eq!(config.limiter.on_store_error, Some(FailurePolicy::Open));
        assert!(!config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_ms, 30_000);
        assert_eq!(config.policies.get("burst"), Some(&Policy::STRICT));
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = std::env::temp_dir().join("turnstile-does-not-exist.yaml");
        assert!(TurnstileConfig::from_file(&path).is_err());
        assert!(TurnstileConfig::load(Some(&path)).is_err());
    }
}
