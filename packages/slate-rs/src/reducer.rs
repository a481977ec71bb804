//! Reducer handles and the type→reducers table.
//!
//! Reducers fold a payload into the store's state. They are registered under
//! event types and run in registration order on every dispatch of that type.
//!
//! # Key Properties
//!
//! - **Working copy**: a reducer receives its own copy of the state and may
//!   edit it in place, return a replacement, or do neither
//! - **No-op sentinel**: returning `Ok(None)` leaves the state alone
//! - **Identity**: each reducer carries a [`ReducerId`] shared by its clones,
//!   which is what `off` matches on
//! - **Panic safety**: a panicking reducer is reported like one that returned
//!   an error; it never unwinds through the store

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::error;

use crate::core::{EventSelector, ReducerId, WILDCARD};
use crate::error::Result;
use crate::store::Store;

/// What a reducer returns: a replacement state, or `None` for "no change".
pub type ReducerResult = anyhow::Result<Option<Value>>;

type ReduceFn = dyn Fn(&ReducerContext<'_>, &mut Value, &Value) -> ReducerResult;

/// Context handed to every reducer invocation.
///
/// Gives the reducer the store that is dispatching (so it can dispatch,
/// attach or detach re-entrantly) and the event type being reduced, which is
/// how wildcard reducers tell dispatches apart.
pub struct ReducerContext<'a> {
    store: &'a Store,
    event_type: &'a str,
}

impl<'a> ReducerContext<'a> {
    pub(crate) fn new(store: &'a Store, event_type: &'a str) -> Self {
        Self { store, event_type }
    }

    /// The dispatching store.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// The event type currently being reduced.
    pub fn event_type(&self) -> &'a str {
        self.event_type
    }

    /// Dispatch on the same store; runs synchronously before this reducer
    /// returns.
    pub fn dispatch(&self, selector: impl Into<EventSelector>, payload: Value) -> Result<()> {
        self.store.dispatch(selector, payload).map(|_| ())
    }
}

/// A cloneable, identity-carrying reducer.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use slate::Reducer;
///
/// let inc = Reducer::new(|_ctx, state, payload| {
///     let by = payload.as_i64().unwrap_or(1);
///     let count = state["count"].as_i64().unwrap_or(0);
///     Ok(Some(json!({ "count": count + by })))
/// });
///
/// // Edit in place instead of returning a replacement
/// let touch = Reducer::new(|_ctx, state, _payload| {
///     state["touched"] = json!(true);
///     Ok(None)
/// });
/// ```
#[derive(Clone)]
pub struct Reducer {
    id: ReducerId,
    name: &'static str,
    func: Rc<ReduceFn>,
}

impl Reducer {
    /// Wrap a closure as a reducer.
    ///
    /// The diagnostic name is derived from the closure's type name.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ReducerContext<'_>, &mut Value, &Value) -> ReducerResult + 'static,
    {
        Self::with_id(ReducerId::new(), std::any::type_name::<F>(), f)
    }

    /// Wrap a closure as a reducer with a custom diagnostic name.
    pub fn named<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&ReducerContext<'_>, &mut Value, &Value) -> ReducerResult + 'static,
    {
        Self::with_id(ReducerId::new(), name, f)
    }

    /// Wrap a closure under a known id, for wrappers that detach themselves.
    pub(crate) fn with_id<F>(id: ReducerId, name: &'static str, f: F) -> Self
    where
        F: Fn(&ReducerContext<'_>, &mut Value, &Value) -> ReducerResult + 'static,
    {
        Self {
            id,
            name,
            func: Rc::new(f),
        }
    }

    /// The reducer's identity.
    pub fn id(&self) -> ReducerId {
        self.id
    }

    /// The reducer's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke the reducer directly.
    ///
    /// Panics propagate; the store itself goes through the panic-safe path.
    pub fn call(&self, ctx: &ReducerContext<'_>, state: &mut Value, payload: &Value) -> ReducerResult {
        (self.func)(ctx, state, payload)
    }

    /// Invoke the reducer, converting a panic into an error.
    ///
    /// The working copy may be half-edited after a panic; the store discards
    /// it in that case.
    pub(crate) fn reduce(
        &self,
        ctx: &ReducerContext<'_>,
        state: &mut Value,
        payload: &Value,
    ) -> ReducerResult {
        match catch_unwind(AssertUnwindSafe(|| (self.func)(ctx, state, payload))) {
            Ok(result) => result,
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };

                error!(
                    reducer = self.name,
                    event_type = ctx.event_type(),
                    panic = %panic_msg,
                    "reducer panicked"
                );
                Err(anyhow::anyhow!(
                    "reducer '{}' panicked: {}",
                    self.name,
                    panic_msg
                ))
            }
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reducer")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Reducer Table
// =============================================================================

/// Type → ordered reducers, in type registration order.
///
/// A type key exists only while it has at least one reducer.
#[derive(Default)]
pub(crate) struct ReducerTable {
    entries: IndexMap<String, Vec<Reducer>>,
}

impl ReducerTable {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Snapshot of what a dispatch of `event_type` runs: its own reducers,
    /// then the wildcard reducers.
    pub fn sequence_for(&self, event_type: &str) -> Vec<Reducer> {
        let mut sequence: Vec<Reducer> = self
            .entries
            .get(event_type)
            .map(|reducers| reducers.to_vec())
            .unwrap_or_default();
        if event_type != WILDCARD {
            if let Some(wildcard) = self.entries.get(WILDCARD) {
                sequence.extend(wildcard.iter().cloned());
            }
        }
        sequence
    }

    /// Append a reducer to a type's sequence.
    pub fn attach(&mut self, event_type: &str, reducer: Reducer) {
        self.entries
            .entry(event_type.to_string())
            .or_default()
            .push(reducer);
    }

    /// Remove the first reducer with `id` from a type; drops the type key
    /// when its sequence becomes empty.
    pub fn detach(&mut self, event_type: &str, id: ReducerId) -> bool {
        let Some(reducers) = self.entries.get_mut(event_type) else {
            return false;
        };
        let Some(index) = reducers.iter().position(|r| r.id == id) else {
            return false;
        };
        reducers.remove(index);
        if reducers.is_empty() {
            self.entries.shift_remove(event_type);
        }
        true
    }

    /// Remove every reducer of a type.
    pub fn detach_all(&mut self, event_type: &str) -> bool {
        self.entries.shift_remove(event_type).is_some()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.entries.get(event_type).map_or(0, Vec::len)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for ReducerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(t, reducers)| (t, reducers.iter().map(|r| r.name).collect::<Vec<_>>())),
            )
            .finish()
    }
}
