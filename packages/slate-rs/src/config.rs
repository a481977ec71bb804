//! Per-store configuration.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

/// Default debounce period for deferred subscriber notification.
pub const DEFAULT_DEBOUNCE_MS: u64 = 15;

/// Behaviour switches for a single store.
///
/// Every store owns its own copy; there is no process-wide mutable default.
/// Use [`StoreConfig::from_env`] to derive defaults for a whole process from
/// the environment and hand the result to each builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dispatching a user type with no reducers fails with
    /// `StoreError::UnknownType` instead of emitting `_MISSING_`.
    ///
    /// Default: false.
    pub strict: bool,

    /// A failing reducer aborts the dispatch with `StoreError::Reducer`
    /// instead of emitting `_ERROR_`.
    ///
    /// Default: false.
    pub throw_on_error: bool,

    /// Reducers edit state in place; their return values are ignored.
    ///
    /// Default: false.
    pub ignore_return_values: bool,

    /// Never record history. `undo` then replays nothing and `after` /
    /// `before` event triggers never count as already fired.
    ///
    /// Default: false.
    pub forget_history: bool,

    /// Debounce subscriber notification on a local timer instead of
    /// notifying synchronously. Requires a `tokio::task::LocalSet`.
    ///
    /// Default: false.
    pub defer_notifications: bool,

    /// Debounce period in milliseconds.
    ///
    /// Default: 15.
    pub debounce_ms: u64,

    /// Include the current state in the store's `Debug` output.
    ///
    /// Default: false.
    pub publish_state: bool,

    /// Include the reducer table in the store's `Debug` output.
    ///
    /// Default: false.
    pub publish_reducers: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            strict: false,
            throw_on_error: false,
            ignore_return_values: false,
            forget_history: false,
            defer_notifications: false,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            publish_state: false,
            publish_reducers: false,
        }
    }
}

impl StoreConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. Booleans accept
    /// `1/0/true/false/yes/no/on/off` (case-insensitive).
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();
        Ok(Self {
            strict: env_flag("SLATE_STRICT", defaults.strict)?,
            throw_on_error: env_flag("SLATE_THROW_ON_ERROR", defaults.throw_on_error)?,
            ignore_return_values: env_flag(
                "SLATE_IGNORE_RETURN_VALUES",
                defaults.ignore_return_values,
            )?,
            forget_history: env_flag("SLATE_FORGET_HISTORY", defaults.forget_history)?,
            defer_notifications: env_flag(
                "SLATE_DEFER_NOTIFICATIONS",
                defaults.defer_notifications,
            )?,
            debounce_ms: match env::var("SLATE_DEBOUNCE_MS") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .context("SLATE_DEBOUNCE_MS must be a valid number")?,
                Err(_) => defaults.debounce_ms,
            },
            publish_state: env_flag("SLATE_PUBLISH_STATE", defaults.publish_state)?,
            publish_reducers: env_flag("SLATE_PUBLISH_REDUCERS", defaults.publish_reducers)?,
        })
    }

    /// Set strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set throw mode.
    pub fn with_throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    /// Set pure-mutation mode.
    pub fn with_ignore_return_values(mut self, ignore: bool) -> Self {
        self.ignore_return_values = ignore;
        self
    }

    /// Set forget-history mode.
    pub fn with_forget_history(mut self, forget: bool) -> Self {
        self.forget_history = forget;
        self
    }

    /// Enable debounced notification with the given period.
    pub fn with_deferred_notifications(mut self, period: Duration) -> Self {
        self.defer_notifications = true;
        self.debounce_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Publish state and/or reducers through `Debug`.
    pub fn with_publish(mut self, state: bool, reducers: bool) -> Self {
        self.publish_state = state;
        self.publish_reducers = reducers;
        self
    }

    /// The debounce period as a `Duration`.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn env_flag(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => parse_flag(&raw).with_context(|| format!("{key} must be a boolean")),
        Err(_) => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("unrecognized boolean {other:?}"),
    }
}
