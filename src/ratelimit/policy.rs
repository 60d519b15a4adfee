//! Rate limit policies.
//!
//! A policy is the `(max_requests, window_ms)` pair a check is evaluated
//! against. Policies are immutable and supplied per call; named policies are
//! collected in a [`PolicySet`] loaded from configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Name of the built-in general purpose policy.
pub const DEFAULT_POLICY: &str = "default";
/// Name of the built-in policy for sensitive operations.
pub const STRICT_POLICY: &str = "strict";

/// A fixed-window rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    /// Number of requests admitted per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Policy {
    /// 10 requests per minute.
    pub const DEFAULT: Policy = Policy {
        max_requests: 10,
        window_ms: 60_000,
    };

    /// 5 requests per minute.
    pub const STRICT: Policy = Policy {
        max_requests: 5,
        window_ms: 60_000,
    };

    /// Create a validated policy.
    pub fn new(max_requests: u64, window: Duration) -> Result<Self> {
        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            TurnstileError::Configuration(format!("window {:?} is too long", window))
        })?;
        let policy = Self {
            max_requests,
            window_ms,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject zero limits and zero-length windows.
    pub fn validate(&self) -> Result<()> {
        match self.invalid_reason() {
            Some(reason) => Err(TurnstileError::Configuration(reason.to_string())),
            None => Ok(()),
        }
    }

    fn invalid_reason(&self) -> Option<&'static str> {
        if self.max_requests == 0 {
            Some("max_requests must be greater than 0")
        } else if self.window_ms == 0 {
            Some("window_ms must be greater than 0")
        } else {
            None
        }
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A collection of named policies.
///
/// The built-in `default` and `strict` policies are always present unless a
/// configuration overrides them by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(DEFAULT_POLICY.to_string(), Policy::DEFAULT);
        policies.insert(STRICT_POLICY.to_string(), Policy::STRICT);
        Self { policies }
    }
}

impl PolicySet {
    /// Create a set holding only the built-in policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse policies from a YAML mapping of name to policy, layered over the
    /// built-ins.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: BTreeMap<String, Policy> = serde_yaml::from_str(yaml).map_err(|e| {
            TurnstileError::Configuration(format!("Failed to parse policies: {}", e))
        })?;
        Self::with_overrides(parsed)
    }

    /// Layer named policies over the built-ins.
    pub fn with_overrides<I, N>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, Policy)>,
        N: Into<String>,
    {
        let mut set = Self::default();
        for (name, policy) in overrides {
            set.insert(name, policy)?;
        }
        Ok(set)
    }

    /// Add or replace a named policy.
    pub fn insert(&mut self, name: impl Into<String>, policy: Policy) -> Result<()> {
        let name = name.into();
        if let Some(reason) = policy.invalid_reason() {
            return Err(TurnstileError::Configuration(format!(
                "policy '{}': {}",
                name, reason
            )));
        }
        self.policies.insert(name, policy);
        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Result<Policy> {
        self.policies
            .get(name)
            .copied()
            .ok_or_else(|| TurnstileError::Configuration(format!("unknown policy '{}'", name)))
    }

    /// Iterate over the policy names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Number of named policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let set = PolicySet::new();
        assert_eq!(set.get("default").unwrap(), Policy::DEFAULT);
        assert_eq!(set.get("strict").unwrap(), Policy::STRICT);
        assert_eq!(Policy::DEFAULT.max_requests, 10);
        assert_eq!(Policy::STRICT.max_requests, 5);
        assert_eq!(Policy::STRICT.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_new_validates() {
        assert!(Policy::new(3, Duration::from_secs(1)).is_ok());
        assert!(matches!(
            Policy::new(0, Duration::from_secs(1)),
            Err(TurnstileError::Configuration(_))
        ));
        assert!(matches!(
            Policy::new(3, Duration::ZERO),
            Err(TurnstileError::Configuration(_))
        ));
    }

    #[test]
    fn test_sub_millisecond_window_rejected() {
        let result = Policy::new(3, Duration::from_micros(500));
        assert!(matches!(result, Err(TurnstileError::Configuration(_))));
    }

    #[test]
    fn test_parse_policies() {
        let yaml = r#"
login:
  max_requests: 3
  window_ms: 300000
strict:
  max_requests: 2
  window_ms: 60000
"#;
        let set = PolicySet::from_yaml(yaml).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.get("login").unwrap().max_requests, 3);
        // Overrides the built-in
        assert_eq!(set.get("strict").unwrap().max_requests, 2);
        assert_eq!(set.get("default").unwrap(), Policy::DEFAULT);
    }

    #[test]
    fn test_parse_rejects_invalid_policy() {
        let yaml = r#"
broken:
  max_requests: 0
  window_ms: 1000
"#;
        let err = PolicySet::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_unknown_policy() {
        let set = PolicySet::new();
        assert!(matches!(
            set.get("missing"),
            Err(TurnstileError::Configuration(_))
        ));
    }

    #[test]
    fn test_names_are_sorted() {
        let set = PolicySet::new();
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["default", "strict"]);
    }
}
