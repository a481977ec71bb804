//! # Slate
//!
//! A small, synchronous, event-sourced state container: reducers fold
//! dispatched events into a single JSON state, subscribers observe the result.
//!
//! ## Core Concepts
//!
//! - **Event type** = a string naming what happened (`"inc"`, `"user.login"`)
//! - [`Reducer`] = a function folding a payload into the state
//! - **Subscriber** = a handler observing the state after each dispatch
//!
//! Event types of the form `_UPPERCASE_` are *internal*: the store emits them
//! for its own lifecycle ([`INIT`], [`MISSING`], [`ERROR`], [`ON`], [`OFF`],
//! [`SUBSCRIBE`], [`UNSUBSCRIBE`]). They never fail for being unregistered and
//! are never recorded in history.
//!
//! ## Architecture
//!
//! ```text
//! caller ─► dispatch(selector, payload)
//!               │
//!               ▼ EventSelector::resolve
//!           [type, type, ...]
//!               │
//!               ├─► reducers(type) ++ reducers("*") ─► state
//!               │        │
//!               │        └─► ctx.dispatch() (nested, depth-first)
//!               │
//!               ├─► history ◄── (type, payload)
//!               │
//!               └─► subscribers (matcher-filtered, optionally debounced)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Registration order** - reducers of a type run in the order attached,
//!    wildcard reducers after them
//! 2. **Owned state** - callers only ever see copies of the state
//! 3. **History is replayable** - `undo(n)` equals a fresh store that saw
//!    only the kept prefix
//! 4. **Failures stay inside** - reducer errors and panics become `_ERROR_`
//!    dispatches unless throw mode is on
//! 5. **Re-entrant** - reducers and subscribers may dispatch; nested
//!    dispatches complete before the outer one continues
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use slate::{Matcher, Reducer, Store, StoreConfig};
//!
//! let inc = Reducer::named("inc", |_ctx, state, payload| {
//!     let by = payload.as_i64().unwrap_or(1);
//!     let count = state["count"].as_i64().unwrap_or(0);
//!     Ok(Some(json!({ "count": count + by })))
//! });
//!
//! let store = Store::builder()
//!     .reducer("inc", inc)
//!     .state(json!({ "count": 0 }))
//!     .config(StoreConfig::from_env()?)
//!     .build()?;
//!
//! let sub = store.subscribe(
//!     |state| println!("count is now {}", state["count"]),
//!     Some(Matcher::types(["inc"])),
//! )?;
//!
//! store.dispatch("inc", json!(2))?;
//! let _ten = store.when("count", json!(10), "ten", json!(null))?;
//! store.undo(1)?;
//!
//! sub.unsubscribe()?;
//! ```
//!
//! ## Threading
//!
//! A [`Store`] is single-threaded (`!Send`). Debounced notification and
//! deferred dispatch run as `tokio` local tasks and need a
//! `tokio::task::LocalSet`; everything else is plain synchronous code.
//! Outside a `LocalSet`, notifications fall back to synchronous delivery and
//! deferred dispatch fails with [`StoreError::NoLocalRuntime`].

// Core modules
mod config;
mod core;
mod deferred;
mod error;
mod operators;
mod reducer;
mod store;
mod subscriber;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core types
pub use crate::core::{
    is_internal, split_types, EventSelector, HistoryEntry, ReducerId, SubscriberId, Thunk,
    TypeList, ERROR, INIT, MISSING, OFF, ON, SUBSCRIBE, UNSUBSCRIBE, WILDCARD,
};

// Re-export error types
pub use crate::error::{Result, StoreError};

// Re-export configuration
pub use config::{StoreConfig, DEFAULT_DEBOUNCE_MS};

// Re-export reducer types
pub use reducer::{Reducer, ReducerContext, ReducerResult};

// Re-export subscriber types
pub use subscriber::{Matcher, Subscription};

// Re-export store types (primary entry point)
pub use store::{Action, Store, StoreBuilder, WeakStore};

// Re-export operator types
pub use operators::{Link, Trigger};
