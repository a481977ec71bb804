//! Structured error type for slate.
//!
//! `StoreError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`.
//!
//! # The Error Boundary Rule
//!
//! > **Reducers speak `anyhow`, the store speaks `StoreError`.**
//!
//! - `anyhow` is what reducers return (ergonomic, any error converts)
//! - `StoreError` is the only error a caller of the store API sees
//!
//! Most failures never reach the caller at all: by default an unknown type
//! becomes a `_MISSING_` dispatch and a failing reducer becomes an `_ERROR_`
//! dispatch. Only strict mode and throw mode turn them into errors.
//!
//! # Example
//!
//! ```ignore
//! use slate::StoreError;
//!
//! match store.dispatch("boom", json!(null)) {
//!     Ok(_) => {}
//!     Err(StoreError::Reducer { event_type, reducer, source }) => {
//!         eprintln!("{reducer} failed on {event_type}: {source:#}");
//!     }
//!     Err(other) => eprintln!("dispatch failed: {other}"),
//! }
//! ```

use thiserror::Error;

/// Alias for results returned by the store API.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Structured error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The initial state did not resolve to a JSON object.
    #[error("initial state must be an object, got {found}")]
    InvalidInitialState {
        /// The JSON kind that was supplied instead.
        found: &'static str,
    },

    /// A user type with no reducers was dispatched in strict mode.
    #[error("unknown event type dispatched: {event_type}")]
    UnknownType {
        /// The unregistered type.
        event_type: String,
    },

    /// A reducer failed while the store runs in throw mode.
    #[error("reducer {reducer} failed while handling {event_type}")]
    Reducer {
        /// The type being reduced.
        event_type: String,
        /// Diagnostic name of the failing reducer.
        reducer: &'static str,
        /// What the reducer reported (or the panic message).
        #[source]
        source: anyhow::Error,
    },

    /// Dispatch was called without any usable event type.
    #[error("dispatch requires a non-empty event type")]
    EmptyEventType,

    /// A structured event object could not be interpreted.
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// What was wrong with it.
        reason: String,
    },

    /// A selector or matcher pattern failed to compile.
    #[error("invalid event pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Deferred work was requested outside a `tokio::task::LocalSet`.
    #[error("deferred work requires a running tokio LocalSet")]
    NoLocalRuntime,
}

/// Human-readable JSON kind, used in construction errors.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
