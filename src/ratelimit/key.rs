//! Identifier construction.
//!
//! The limiter treats identifiers as opaque strings. `RateLimitKey` is a small
//! helper for building namespaced identifiers so that separately limited
//! operations draw from separate budgets.

use std::fmt;

const SEPARATOR: char = ':';

/// A namespaced rate limit identifier such as `user:42` or `action:login:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The namespace this key belongs to
    pub scope: String,
    /// Ordered components within the scope
    pub parts: Vec<String>,
}

impl RateLimitKey {
    /// Create a key with a scope and no components.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            parts: Vec::new(),
        }
    }

    /// Key for a user's general budget: `user:<id>`.
    pub fn user(user_id: impl fmt::Display) -> Self {
        Self::new("user").with(user_id)
    }

    /// Key for a client address: `ip:<addr>`.
    pub fn ip(addr: impl fmt::Display) -> Self {
        Self::new("ip").with(addr)
    }

    /// Key for a named action performed by a user: `action:<name>:<id>`.
    pub fn action(name: impl fmt::Display, user_id: impl fmt::Display) -> Self {
        Self::new("action").with(name).with(user_id)
    }

    /// Append a component.
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Convert the key to the identifier string used by the store.
    pub fn to_identifier(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope)?;
        for part in &self.parts {
            write!(f, "{}{}", SEPARATOR, part)?;
        }
        Ok(())
    }
}

impl From<RateLimitKey> for String {
    fn from(key: RateLimitKey) -> Self {
        key.to_identifier()
    }
}
