//! Core types for the slate state container.
//!
//! # Overview
//!
//! Every dispatch is addressed by an **event type**, a plain string. Two
//! namespaces share that string space:
//! - *internal* types match `_UPPERCASE_` (e.g. [`INIT`], [`MISSING`]) and
//!   mark lifecycle moments of the store itself;
//! - *user* types are everything else.
//!
//! Internal types never fail for being unregistered and are never recorded in
//! history.
//!
//! Callers address dispatches with an [`EventSelector`], a closed set of
//! shapes (single/comma-separated type, list, pattern, structured event,
//! thunk, deferred future) which resolves into an ordered list of plain type
//! strings before the reduction loop runs.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::Store;

/// Dispatched once at construction and after `reset()` / `forget()`.
pub const INIT: &str = "_INIT_";
/// Dispatched with `[type, payload]` when a user type has no reducers.
pub const MISSING: &str = "_MISSING_";
/// Dispatched with `[message, type, payload]` when a reducer fails.
pub const ERROR: &str = "_ERROR_";
/// Dispatched with `[type, reducer_id]` when a reducer is attached.
pub const ON: &str = "_ON_";
/// Dispatched with `[type, reducer_id]` before a reducer is detached.
pub const OFF: &str = "_OFF_";
/// Dispatched with `[subscriber_id, matcher]` when a subscriber joins.
pub const SUBSCRIBE: &str = "_SUBSCRIBE_";
/// Dispatched with `[subscriber_id]` when a subscriber leaves.
pub const UNSUBSCRIBE: &str = "_UNSUBSCRIBE_";
/// Reducers registered under this type run after every resolved type's own
/// reducers.
pub const WILDCARD: &str = "*";

/// Ordered list of resolved event types.
pub type TypeList = SmallVec<[String; 4]>;

/// Returns true if `event_type` belongs to the internal namespace
/// (`_` + one or more ASCII uppercase letters + `_`).
pub fn is_internal(event_type: &str) -> bool {
    let bytes = event_type.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'_'
        && bytes[bytes.len() - 1] == b'_'
        && bytes[1..bytes.len() - 1]
            .iter()
            .all(|b| b.is_ascii_uppercase())
}

/// Split a comma-separated type string into its trimmed, non-empty parts.
///
/// ```
/// let types = slate::split_types(" a, b ,,c ");
/// assert_eq!(types.as_slice(), ["a", "b", "c"]);
/// ```
pub fn split_types(types: &str) -> TypeList {
    types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Identifiers
// =============================================================================

/// Stable identity of a [`Reducer`](crate::Reducer).
///
/// Reducers are closures, which cannot be compared, so `off` and the derived
/// operators detach by id. Clones of a reducer share its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReducerId(Uuid);

impl ReducerId {
    /// Create a new random reducer id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ReducerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a subscriber pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// History
// =============================================================================

/// One recorded user dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The resolved event type.
    pub event_type: String,
    /// The payload the reducers received.
    pub payload: Value,
    /// When the dispatch was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Issued from inside a reducer or subscriber while another dispatch was
    /// running. Replaying the enclosing entry issues it again.
    #[serde(default)]
    pub nested: bool,
}

impl HistoryEntry {
    pub(crate) fn new(event_type: impl Into<String>, payload: Value, nested: bool) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            recorded_at: Utc::now(),
            nested,
        }
    }
}

// =============================================================================
// Event Selector
// =============================================================================

/// A deferred callback that receives the store and dispatches on its own terms.
pub type Thunk = Box<dyn FnOnce(&Store) -> Result<()>>;

/// Every shape a dispatch target can take.
///
/// Most callers never name this type: `&str`, `String`, string lists and
/// [`Regex`] convert into it, so `store.dispatch("a, b", payload)` just works.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use slate::EventSelector;
///
/// store.dispatch("inc", json!(1))?;
/// store.dispatch(["inc", "log"], json!(1))?;
/// store.dispatch(EventSelector::pattern("^inc")?, json!(1))?;
/// store.dispatch(EventSelector::event(json!({ "type": "inc", "by": 2 })), json!(null))?;
/// store.dispatch(EventSelector::thunk(|s| s.dispatch("inc", json!(1)).map(|_| ())), json!(null))?;
/// ```
pub enum EventSelector {
    /// One type, or several separated by commas.
    Types(String),
    /// A list of types; each element may itself be comma-separated.
    List(Vec<String>),
    /// Every registered type the pattern matches, in registration order.
    Pattern(Regex),
    /// A structured event object with its own string `type` field.
    Event(Value),
    /// A callback invoked with the store instead of a type.
    Thunk(Thunk),
    /// A future resolving to the real selector; dispatch happens on resolution.
    Deferred(LocalBoxFuture<'static, EventSelector>),
}

impl EventSelector {
    /// Build a pattern selector from a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    /// Build a structured-event selector.
    pub fn event(event: Value) -> Self {
        Self::Event(event)
    }

    /// Build a thunk selector.
    pub fn thunk<F>(f: F) -> Self
    where
        F: FnOnce(&Store) -> Result<()> + 'static,
    {
        Self::Thunk(Box::new(f))
    }

    /// Build a deferred selector from any future yielding something selectable.
    pub fn deferred<Fut, S>(future: Fut) -> Self
    where
        Fut: std::future::Future<Output = S> + 'static,
        S: Into<EventSelector>,
    {
        Self::Deferred(future.map(|s| -> EventSelector { s.into() }).boxed_local())
    }

    /// Normalize this selector into plain event types.
    ///
    /// `registered` lists the store's registered type keys in table order;
    /// only pattern selectors consult it.
    pub(crate) fn resolve<'a, I>(self, payload: Value, registered: I) -> Result<Resolved>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self {
            EventSelector::Types(types) => {
                let types = split_types(&types);
                if types.is_empty() {
                    return Err(StoreError::EmptyEventType);
                }
                Ok(Resolved::Types { types, payload })
            }
            EventSelector::List(list) => {
                let types: TypeList = list.iter().flat_map(|t| split_types(t)).collect();
                if types.is_empty() {
                    return Err(StoreError::EmptyEventType);
                }
                Ok(Resolved::Types { types, payload })
            }
            EventSelector::Pattern(pattern) => {
                let types = registered
                    .into_iter()
                    .filter(|t| *t != WILDCARD && pattern.is_match(t))
                    .map(str::to_string)
                    .collect();
                Ok(Resolved::Types { types, payload })
            }
            EventSelector::Event(event) => {
                let event_type = match event.get("type") {
                    Some(Value::String(t)) => t.clone(),
                    Some(_) => {
                        return Err(StoreError::MalformedEvent {
                            reason: "`type` field is not a string".to_string(),
                        })
                    }
                    None => {
                        return Err(StoreError::MalformedEvent {
                            reason: "missing `type` field".to_string(),
                        })
                    }
                };
                let types = split_types(&event_type);
                if types.is_empty() {
                    return Err(StoreError::EmptyEventType);
                }
                let payload = if payload.is_null() { event } else { payload };
                Ok(Resolved::Types { types, payload })
            }
            EventSelector::Thunk(thunk) => Ok(Resolved::Thunk(thunk)),
            EventSelector::Deferred(future) => Ok(Resolved::Deferred { future, payload }),
        }
    }
}

impl fmt::Debug for EventSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSelector::Types(t) => f.debug_tuple("Types").field(t).finish(),
            EventSelector::List(l) => f.debug_tuple("List").field(l).finish(),
            EventSelector::Pattern(p) => f.debug_tuple("Pattern").field(&p.as_str()).finish(),
            EventSelector::Event(e) => f.debug_tuple("Event").field(e).finish(),
            EventSelector::Thunk(_) => f.write_str("Thunk(..)"),
            EventSelector::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<&str> for EventSelector {
    fn from(types: &str) -> Self {
        Self::Types(types.to_string())
    }
}

impl From<String> for EventSelector {
    fn from(types: String) -> Self {
        Self::Types(types)
    }
}

impl From<&String> for EventSelector {
    fn from(types: &String) -> Self {
        Self::Types(types.clone())
    }
}

impl From<Vec<String>> for EventSelector {
    fn from(list: Vec<String>) -> Self {
        Self::List(list)
    }
}

impl From<Vec<&str>> for EventSelector {
    fn from(list: Vec<&str>) -> Self {
        Self::List(list.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for EventSelector {
    fn from(list: &[&str]) -> Self {
        Self::List(list.iter().map(|t| t.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for EventSelector {
    fn from(list: [&str; N]) -> Self {
        Self::List(list.iter().map(|t| t.to_string()).collect())
    }
}

impl From<Regex> for EventSelector {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

/// Outcome of [`EventSelector::resolve`].
pub(crate) enum Resolved {
    /// Plain types to run through the reduction loop, in order.
    Types { types: TypeList, payload: Value },
    /// Hand the store to a callback.
    Thunk(Thunk),
    /// Dispatch once the future resolves.
    Deferred {
        future: LocalBoxFuture<'static, EventSelector>,
        payload: Value,
    },
}
