//! Runtime configuration.
//!
//! Configuration is per thread, like the rest of the observation graph.
//! Hosts install a [`StateConfig`] once at startup; tests install their own
//! to pick a violation policy.

use std::cell::RefCell;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

thread_local! {
    static CONFIG: RefCell<StateConfig> = RefCell::new(StateConfig::default());
}

/// What to do when an internal invariant is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Log and panic.
    Panic,
    /// Log and continue.
    Log,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Log
        }
    }
}

/// Policy knobs for the state management runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Handling of `DuplicateId` and `StaleSubscriberAccess`.
    pub on_violation: ViolationPolicy,

    /// Frame period of [`RenderScheduler::run`](crate::view::RenderScheduler::run).
    pub frame_interval_ms: u64,

    /// Warn when a view creates a default `LocalStorage` because none was provided.
    pub warn_on_default_storage: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            on_violation: ViolationPolicy::default(),
            frame_interval_ms: 16,
            warn_on_default_storage: true,
        }
    }
}

impl StateConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The frame period as a [`Duration`].
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Make this the active configuration for the current thread.
    pub fn install(self) {
        CONFIG.with(|config| *config.borrow_mut() = self);
    }

    /// The active configuration for the current thread.
    pub fn current() -> Self {
        CONFIG.with(|config| config.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StateConfig::from_json(r#"{ "on_violation": "log" }"#).unwrap();
        assert_eq!(config.on_violation, ViolationPolicy::Log);
        assert_eq!(config.frame_interval_ms, 16);
        assert!(config.warn_on_default_storage);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(StateConfig::from_json(r#"{ "on_violation": "explode" }"#).is_err());
    }

    #[test]
    fn install_is_per_thread() {
        StateConfig {
            frame_interval_ms: 40,
            ..StateConfig::default()
        }
        .install();
        assert_eq!(StateConfig::current().frame_interval(), Duration::from_millis(40));

        let other = std::thread::spawn(|| StateConfig::current().frame_interval_ms)
            .join()
            .unwrap();
        assert_eq!(other, 16);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = StateConfig {
            frame_interval_ms: 0,
            ..StateConfig::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(1));
    }
}
