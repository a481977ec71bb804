//! Slate Store - the dispatch engine that owns state, reducers and subscribers.
//!
//! The Store is the single component of slate:
//!
//! ```text
//! dispatch(selector, payload)
//!    │
//!    ▼ resolve
//! [type, type, ...] ──► for each type:
//!                         reducers(type) ++ reducers("*")
//!                            │ fold over state (working copy per reducer)
//!                            ▼
//!                         history ◄── (type, payload) unless internal
//!                            │
//!                            ▼
//!                         subscribers (matcher-filtered, or debounced)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use serde_json::json;
//! use slate::{Reducer, Store};
//!
//! let store = Store::builder()
//!     .reducer("inc", Reducer::new(|_ctx, state, _payload| {
//!         let count = state["count"].as_i64().unwrap_or(0);
//!         Ok(Some(json!({ "count": count + 1 })))
//!     }))
//!     .state(json!({ "count": 0 }))
//!     .build()?;
//!
//! store.dispatch("inc", json!(null))?.dispatch("inc", json!(null))?;
//! assert_eq!(store.get_state()["count"], 2);
//! ```
//!
//! # Re-entrancy
//!
//! No internal borrow is held while user code runs, so reducers and
//! subscribers may call back into the store. Nested dispatches run
//! depth-first and finish (notifications included) before the outer dispatch
//! moves on to its next reducer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::config::StoreConfig;
use crate::core::{
    is_internal, split_types, EventSelector, HistoryEntry, ReducerId, Resolved, SubscriberId,
    ERROR, INIT, MISSING, OFF, ON, SUBSCRIBE, UNSUBSCRIBE,
};
use crate::deferred::{self, DeferredNotifier};
use crate::error::{json_kind, Result, StoreError};
use crate::reducer::{Reducer, ReducerContext, ReducerTable};
use crate::subscriber::{Matcher, Subscriber, SubscriberPool, Subscription};

// =============================================================================
// Depth Guard (RAII)
// =============================================================================

/// RAII guard tracking how deeply dispatches are nested.
///
/// Decrements on drop, so an early `?` return or a propagated error never
/// leaves the counter elevated.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

// =============================================================================
// Store
// =============================================================================

struct StoreInner {
    config: StoreConfig,
    state: RefCell<Value>,
    /// Baseline restored by `undo` / `reset`, replaced by `forget`.
    original: RefCell<Value>,
    reducers: RefCell<ReducerTable>,
    subscribers: RefCell<SubscriberPool>,
    history: RefCell<Vec<HistoryEntry>>,
    flags: RefCell<IndexMap<String, Value>>,
    notifier: DeferredNotifier,
    depth: Cell<usize>,
    /// Recorded dispatches currently running. Entries recorded while it is
    /// non-zero are nested.
    recording: Cell<usize>,
}

/// The slate dispatch engine.
///
/// `Store` is a cheap handle: clones share one engine. It is single-threaded
/// (`!Send`); use [`WeakStore`] to refer to a store without keeping it alive.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Non-owning handle to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    /// Get the store back if it is still alive.
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Store {
    /// Create a new store builder.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Create a store from a reducer mapping and an initial state, with the
    /// default configuration.
    pub fn new<I, K>(reducers: I, state: Value) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Reducer)>,
        K: Into<String>,
    {
        reducers
            .into_iter()
            .fold(StoreBuilder::new(), |builder, (event_type, reducer)| {
                builder.reducer(event_type, reducer)
            })
            .state(state)
            .build()
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Create a non-owning handle.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Resolve `selector` and run every resolved type through its reducers,
    /// then notify subscribers.
    ///
    /// Returns the store for chaining.
    ///
    /// # Errors
    ///
    /// - `EmptyEventType` / `MalformedEvent` for selectors naming no type
    /// - `UnknownType` for unregistered user types in strict mode
    /// - `Reducer` for failing reducers in throw mode
    /// - `NoLocalRuntime` for deferred selectors outside a `LocalSet`
    pub fn dispatch(&self, selector: impl Into<EventSelector>, payload: Value) -> Result<&Self> {
        let resolved = {
            let reducers = self.inner.reducers.borrow();
            let resolved = selector.into().resolve(payload, reducers.types());
            resolved
        }?;

        match resolved {
            Resolved::Types { types, payload } => {
                for event_type in &types {
                    self.dispatch_type(event_type, &payload)?;
                }
            }
            Resolved::Thunk(thunk) => thunk(self)?,
            Resolved::Deferred { future, payload } => {
                deferred::dispatch_when_ready(self.downgrade(), future, payload)?;
            }
        }

        Ok(self)
    }

    /// Run one resolved type through the reduction loop.
    pub(crate) fn dispatch_type(&self, event_type: &str, payload: &Value) -> Result<()> {
        let internal = is_internal(event_type);
        let sequence = self.inner.reducers.borrow().sequence_for(event_type);

        if sequence.is_empty() && !internal {
            if self.inner.config.strict {
                return Err(StoreError::UnknownType {
                    event_type: event_type.to_string(),
                });
            }
            debug!(event_type, "no reducers registered, dispatching _MISSING_");
            return self.dispatch_type(MISSING, &json!([event_type, payload]));
        }

        let recorded = !internal && !self.inner.config.forget_history;
        if recorded {
            self.inner.history.borrow_mut().push(HistoryEntry::new(
                event_type,
                payload.clone(),
                self.inner.recording.get() > 0,
            ));
        }

        let _depth = DepthGuard::enter(&self.inner.depth);
        let _recording = recorded.then(|| DepthGuard::enter(&self.inner.recording));
        trace!(
            event_type,
            reducers = sequence.len(),
            depth = self.inner.depth.get(),
            "dispatching"
        );

        let ctx = ReducerContext::new(self, event_type);
        for reducer in &sequence {
            let before = self.get_state();
            let mut working = before.clone();
            match reducer.reduce(&ctx, &mut working, payload) {
                Ok(returned) => self.apply(returned, working, &before),
                Err(source) => self.reducer_failed(event_type, reducer, payload, source)?,
            }
        }

        self.notify(event_type);
        Ok(())
    }

    /// Fold one reducer's outcome into the state.
    ///
    /// A non-null return value replaces the state outright (no merge). With no
    /// usable return value, in-place edits of the working copy are kept; an
    /// untouched working copy leaves the state as it is, including anything
    /// nested dispatches changed meanwhile.
    fn apply(&self, returned: Option<Value>, working: Value, before: &Value) {
        let next = match returned {
            Some(value) if !self.inner.config.ignore_return_values && !value.is_null() => {
                Some(value)
            }
            _ if working != *before => Some(working),
            _ => None,
        };
        if let Some(next) = next {
            *self.inner.state.borrow_mut() = next;
        }
    }

    fn reducer_failed(
        &self,
        event_type: &str,
        reducer: &Reducer,
        payload: &Value,
        source: anyhow::Error,
    ) -> Result<()> {
        if self.inner.config.throw_on_error {
            return Err(StoreError::Reducer {
                event_type: event_type.to_string(),
                reducer: reducer.name(),
                source,
            });
        }

        warn!(
            event_type,
            reducer = reducer.name(),
            error = %source,
            "reducer failed"
        );

        // A failing _ERROR_ reducer must not feed itself.
        if event_type == ERROR {
            return Ok(());
        }
        self.dispatch_type(ERROR, &json!([format!("{source:#}"), event_type, payload]))
    }

    fn notify(&self, event_type: &str) {
        if self.inner.subscribers.borrow().len() == 0 {
            return;
        }
        if self.inner.config.defer_notifications {
            let scheduled = self.inner.notifier.schedule(
                self.downgrade(),
                event_type.to_string(),
                self.inner.config.debounce(),
            );
            match scheduled {
                Ok(()) => return,
                Err(e) => warn!(
                    event_type,
                    error = %e,
                    "cannot defer notification, notifying now"
                ),
            }
        }
        self.notify_now(event_type);
    }

    /// Notify every subscriber whose matcher accepts `event_type`.
    ///
    /// Each handler receives a fresh copy of the state at the moment it is
    /// called, so it sees changes made by handlers before it.
    pub(crate) fn notify_now(&self, event_type: &str) {
        let subscribers = self.inner.subscribers.borrow().matching(event_type);
        for subscriber in subscribers {
            subscriber.notify(&self.get_state());
        }
    }

    // -------------------------------------------------------------------------
    // Reducer registration
    // -------------------------------------------------------------------------

    /// Attach a reducer to one or more comma-separated types.
    ///
    /// Dispatches `_ON_` for each type and re-dispatches a flagged value if
    /// the type has one.
    pub fn on(&self, types: &str, reducer: Reducer) -> Result<&Self> {
        let types = split_types(types);
        if types.is_empty() {
            return Err(StoreError::EmptyEventType);
        }

        for event_type in &types {
            self.inner
                .reducers
                .borrow_mut()
                .attach(event_type, reducer.clone());
            debug!(
                event_type = %event_type,
                reducer = reducer.name(),
                "reducer attached"
            );
            self.dispatch_type(ON, &json!([event_type, reducer.id()]))?;

            let flagged = self
                .inner
                .flags
                .borrow()
                .get(event_type.as_str())
                .filter(|value| !value.is_null())
                .cloned();
            if let Some(value) = flagged {
                self.dispatch_type(event_type, &value)?;
            }
        }
        Ok(self)
    }

    /// Attach several reducers at once.
    pub fn on_many<I, K>(&self, reducers: I) -> Result<&Self>
    where
        I: IntoIterator<Item = (K, Reducer)>,
        K: AsRef<str>,
    {
        for (types, reducer) in reducers {
            self.on(types.as_ref(), reducer)?;
        }
        Ok(self)
    }

    /// Detach a reducer from one or more comma-separated types.
    ///
    /// Returns whether it was attached to any of them. Removing the last
    /// reducer of a type unregisters the type.
    pub fn off(&self, types: &str, reducer: &Reducer) -> Result<bool> {
        self.off_id(types, reducer.id())
    }

    /// Detach a reducer by id.
    pub fn off_id(&self, types: &str, id: ReducerId) -> Result<bool> {
        let mut removed = false;
        for event_type in split_types(types) {
            if !self.inner.reducers.borrow().contains(&event_type) {
                continue;
            }
            self.dispatch_type(OFF, &json!([event_type, id]))?;
            if self.inner.reducers.borrow_mut().detach(&event_type, id) {
                debug!(event_type = %event_type, %id, "reducer detached");
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Detach every reducer of one or more comma-separated types.
    pub fn off_all(&self, types: &str) -> Result<bool> {
        let mut removed = false;
        for event_type in split_types(types) {
            if !self.inner.reducers.borrow().contains(&event_type) {
                continue;
            }
            self.dispatch_type(OFF, &json!([event_type, "*"]))?;
            if self.inner.reducers.borrow_mut().detach_all(&event_type) {
                debug!(event_type = %event_type, "all reducers detached");
                removed = true;
            }
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Flags
    // -------------------------------------------------------------------------

    /// Remember `value` for each type and dispatch it now. Reducers attached
    /// later to a flagged type trigger an immediate re-dispatch of the value.
    pub fn flag(&self, types: &str, value: Value) -> Result<&Self> {
        let types = split_types(types);
        if types.is_empty() {
            return Err(StoreError::EmptyEventType);
        }
        for event_type in &types {
            self.inner
                .flags
                .borrow_mut()
                .insert(event_type.clone(), value.clone());
            self.dispatch_type(event_type, &value)?;
        }
        Ok(self)
    }

    /// Forget the flagged value of each type.
    pub fn unflag(&self, types: &str) -> &Self {
        let mut flags = self.inner.flags.borrow_mut();
        for event_type in split_types(types) {
            flags.shift_remove(&event_type);
        }
        self
    }

    /// The flagged value of a type, if any.
    pub fn flagged(&self, event_type: &str) -> Option<Value> {
        self.inner.flags.borrow().get(event_type).cloned()
    }

    // -------------------------------------------------------------------------
    // History, undo, reset
    // -------------------------------------------------------------------------

    /// Restore the original state and replay all but the last `n` top-level
    /// dispatches (`0` counts as `1`).
    ///
    /// Nested entries are dropped along with the dispatch that issued them
    /// and are never replayed on their own: re-running their parent issues
    /// them again.
    pub fn undo(&self, n: usize) -> Result<&Self> {
        let n = n.max(1);
        let replay = {
            let mut history = self.inner.history.borrow_mut();
            let keep = history
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, entry)| !entry.nested)
                .nth(n - 1)
                .map_or(0, |(index, _)| index);
            history.truncate(keep);
            std::mem::take(&mut *history)
        };
        *self.inner.state.borrow_mut() = self.inner.original.borrow().clone();

        debug!(undone = n, replayed = replay.len(), "undo");

        // Replayed entries are top-level even when undo runs inside a reducer.
        let outer = self.inner.recording.replace(0);
        let replayed = replay
            .iter()
            .filter(|entry| !entry.nested)
            .try_for_each(|entry| self.dispatch_type(&entry.event_type, &entry.payload));
        self.inner.recording.set(outer);
        replayed?;

        Ok(self)
    }

    /// Clear history, restore the original state and dispatch `_INIT_`.
    pub fn reset(&self) -> Result<&Self> {
        self.inner.history.borrow_mut().clear();
        *self.inner.state.borrow_mut() = self.inner.original.borrow().clone();
        debug!("store reset");
        self.dispatch_type(INIT, &json!([]))?;
        Ok(self)
    }

    /// Clear history, adopt the current state as the new original and
    /// dispatch `_INIT_`.
    pub fn forget(&self) -> Result<&Self> {
        self.inner.history.borrow_mut().clear();
        *self.inner.original.borrow_mut() = self.get_state();
        debug!("store history forgotten");
        self.dispatch_type(INIT, &json!([]))?;
        Ok(self)
    }

    /// Copy of the recorded history.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.borrow().clone()
    }

    /// Number of recorded history entries.
    pub fn history_len(&self) -> usize {
        self.inner.history.borrow().len()
    }

    /// Whether `event_type` appears in history.
    pub fn has_fired(&self, event_type: &str) -> bool {
        self.inner
            .history
            .borrow()
            .iter()
            .any(|entry| entry.event_type == event_type)
    }

    // -------------------------------------------------------------------------
    // Subscribers
    // -------------------------------------------------------------------------

    /// Add a subscriber notified with the state after every dispatch its
    /// matcher accepts (every dispatch if `None`).
    pub fn subscribe<F>(&self, handler: F, matcher: Option<Matcher>) -> Result<Subscription>
    where
        F: Fn(&Value) + 'static,
    {
        self.add_subscriber(Subscriber::new(SubscriberId::new(), handler, matcher))
    }

    pub(crate) fn add_subscriber(&self, subscriber: Subscriber) -> Result<Subscription> {
        let id = subscriber.id();
        let matcher = subscriber.matcher().map_or(Value::Null, Matcher::describe);
        self.inner.subscribers.borrow_mut().add(subscriber);
        debug!(subscriber = %id, "subscriber added");
        self.dispatch_type(SUBSCRIBE, &json!([id, matcher]))?;
        Ok(Subscription::new(self.downgrade(), id))
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriberId) -> Result<&Self> {
        if self.inner.subscribers.borrow_mut().remove(id) {
            debug!(subscriber = %id, "subscriber removed");
        }
        self.dispatch_type(UNSUBSCRIBE, &json!([id]))?;
        Ok(self)
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Whether a debounced notification is waiting for its timer.
    pub fn has_pending_notification(&self) -> bool {
        self.inner.notifier.is_pending()
    }

    // -------------------------------------------------------------------------
    // State and introspection
    // -------------------------------------------------------------------------

    /// Copy of the current state.
    pub fn get_state(&self) -> Value {
        self.inner.state.borrow().clone()
    }

    /// Copy of one top-level state property.
    pub fn get(&self, property: &str) -> Option<Value> {
        self.inner.state.borrow().get(property).cloned()
    }

    /// Bound dispatcher for a registered type.
    ///
    /// Returns `None` if the type has no reducers.
    pub fn action(&self, event_type: &str) -> Option<Action> {
        self.inner
            .reducers
            .borrow()
            .contains(event_type)
            .then(|| Action {
                store: self.downgrade(),
                event_type: event_type.to_string(),
            })
    }

    /// Registered types, in registration order.
    pub fn registered_types(&self) -> Vec<String> {
        self.inner
            .reducers
            .borrow()
            .types()
            .map(str::to_string)
            .collect()
    }

    /// Number of reducers registered for a type (wildcard not included).
    pub fn reducer_count(&self, event_type: &str) -> usize {
        self.inner.reducers.borrow().count(event_type)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Store");
        debug
            .field("history_len", &self.history_len())
            .field("subscriber_count", &self.subscriber_count());
        if self.inner.config.publish_state {
            debug.field("state", &self.inner.state.borrow());
        }
        if self.inner.config.publish_reducers {
            debug.field("reducers", &self.inner.reducers.borrow());
        }
        debug.finish_non_exhaustive()
    }
}

// =============================================================================
// Action
// =============================================================================

/// A dispatcher bound to one registered type, from [`Store::action`].
#[derive(Debug, Clone)]
pub struct Action {
    store: WeakStore,
    event_type: String,
}

impl Action {
    /// The bound type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Dispatch the bound type. A no-op once the store has been dropped.
    pub fn dispatch(&self, payload: Value) -> Result<()> {
        match self.store.upgrade() {
            Some(store) => store.dispatch(self.event_type.as_str(), payload).map(|_| ()),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Store Builder
// =============================================================================

enum InitialState {
    Value(Value),
    Factory(Box<dyn FnOnce() -> Value>),
}

/// Builder for constructing a [`Store`].
///
/// # Example
///
/// ```ignore
/// let store = Store::builder()
///     .reducer("inc", inc)
///     .reducer("inc", log)               // second reducer for the same type
///     .reducers("reset", [clear, log])
///     .state_with(|| json!({ "seed": fastrand::u32(..) }))
///     .subscriber(render, None)
///     .config(StoreConfig::new().with_strict(true))
///     .build()?;
/// ```
pub struct StoreBuilder {
    reducers: ReducerTable,
    state: InitialState,
    subscribers: SubscriberPool,
    config: StoreConfig,
}

impl StoreBuilder {
    /// Create a builder with no reducers, `{}` as state and default config.
    pub fn new() -> Self {
        Self {
            reducers: ReducerTable::new(),
            state: InitialState::Value(json!({})),
            subscribers: SubscriberPool::new(),
            config: StoreConfig::default(),
        }
    }

    /// Register a reducer for one or more comma-separated types.
    ///
    /// Reducers for the same type run in the order they are registered.
    pub fn reducer(mut self, types: impl Into<String>, reducer: Reducer) -> Self {
        for event_type in split_types(&types.into()) {
            self.reducers.attach(&event_type, reducer.clone());
        }
        self
    }

    /// Register a sequence of reducers for one or more types.
    pub fn reducers<I>(self, types: impl Into<String>, reducers: I) -> Self
    where
        I: IntoIterator<Item = Reducer>,
    {
        let types = types.into();
        reducers
            .into_iter()
            .fold(self, |builder, reducer| builder.reducer(types.as_str(), reducer))
    }

    /// Set the initial state.
    pub fn state(mut self, state: Value) -> Self {
        self.state = InitialState::Value(state);
        self
    }

    /// Produce the initial state lazily; the factory runs once, in `build`.
    pub fn state_with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Value + 'static,
    {
        self.state = InitialState::Factory(Box::new(factory));
        self
    }

    /// Pre-populate the subscriber pool. No `_SUBSCRIBE_` is dispatched for
    /// these.
    pub fn subscriber<F>(mut self, handler: F, matcher: Option<Matcher>) -> Self
    where
        F: Fn(&Value) + 'static,
    {
        self.subscribers
            .add(Subscriber::new(SubscriberId::new(), handler, matcher));
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the store and dispatch `_INIT_`.
    ///
    /// # Errors
    ///
    /// `InvalidInitialState` if the state is not a JSON object.
    pub fn build(self) -> Result<Store> {
        let state = match self.state {
            InitialState::Value(state) => state,
            InitialState::Factory(factory) => factory(),
        };
        if !state.is_object() {
            return Err(StoreError::InvalidInitialState {
                found: json_kind(&state),
            });
        }

        let store = Store {
            inner: Rc::new(StoreInner {
                config: self.config,
                original: RefCell::new(state.clone()),
                state: RefCell::new(state),
                reducers: RefCell::new(self.reducers),
                subscribers: RefCell::new(self.subscribers),
                history: RefCell::new(Vec::new()),
                flags: RefCell::new(IndexMap::new()),
                notifier: DeferredNotifier::new(),
                depth: Cell::new(0),
                recording: Cell::new(0),
            }),
        };

        info!(
            types = store.registered_types().len(),
            subscribers = store.subscriber_count(),
            "slate store initialized"
        );
        store.dispatch_type(INIT, &json!([]))?;
        Ok(store)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WILDCARD;
    use crate::testing::Recorder;
    use std::time::Duration;

    fn inc() -> Reducer {
        Reducer::named("inc", |_, state, payload| {
            let by = payload.as_i64().unwrap_or(1);
            let count = state["count"].as_i64().unwrap_or(0);
            Ok(Some(json!({ "count": count + by })))
        })
    }

    fn counter() -> Store {
        Store::new([("inc", inc())], json!({ "count": 0 })).unwrap()
    }

    fn failing() -> Reducer {
        Reducer::named("explode", |_, _, _| Err(anyhow::anyhow!("kaboom")))
    }

    // ==========================================================================
    // Construction
    // ==========================================================================

    #[test]
    fn test_initial_state_is_copied() {
        let mut initial = json!({ "count": 0, "nested": { "a": 1 } });
        let store = Store::new([("inc", inc())], initial.clone()).unwrap();
        initial["count"] = json!(99);

        assert_eq!(store.get_state(), json!({ "count": 0, "nested": { "a": 1 } }));
    }

    #[test]
    fn test_default_state_is_empty_object() {
        let store = Store::builder().build().unwrap();
        assert_eq!(store.get_state(), json!({}));
    }

    #[test]
    fn test_state_factory_runs_once() {
        let calls = Rc::new(Cell::new(0));
        let counted = calls.clone();
        let store = Store::builder()
            .state_with(move || {
                counted.set(counted.get() + 1);
                json!({ "seed": 7 })
            })
            .build()
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(store.get_state(), json!({ "seed": 7 }));
        store.reset().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(store.get_state(), json!({ "seed": 7 }));
    }

    #[test]
    fn test_non_object_state_is_rejected() {
        let err = Store::builder().state(json!([1, 2])).build().unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidInitialState { found: "array" }
        ));

        let err = Store::builder().state_with(|| json!(3)).build().unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidInitialState { found: "number" }
        ));
    }

    #[test]
    fn test_init_dispatched_on_construction() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(INIT, recorder.reducer())
            .build()
            .unwrap();

        assert_eq!(recorder.calls(), [(INIT.to_string(), json!([]))]);
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_builder_splits_comma_separated_keys() {
        let store = Store::builder()
            .reducer("a, b", inc())
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();
        assert_eq!(store.registered_types(), ["a", "b"]);
    }

    // ==========================================================================
    // Dispatch
    // ==========================================================================

    #[test]
    fn test_dispatch_three_times() {
        let store = counter();
        store
            .dispatch("inc", Value::Null)
            .unwrap()
            .dispatch("inc", Value::Null)
            .unwrap()
            .dispatch("inc", Value::Null)
            .unwrap();

        assert_eq!(store.get_state()["count"], 3);
        assert_eq!(store.history_len(), 3);
    }

    #[test]
    fn test_history_records_type_and_payload_in_order() {
        let store = Store::builder()
            .reducer("a", inc())
            .reducer("b", inc())
            .build()
            .unwrap();
        store.dispatch("a", json!(1)).unwrap();
        store.dispatch("b", json!(2)).unwrap();

        let history: Vec<_> = store
            .history()
            .into_iter()
            .map(|e| (e.event_type, e.payload))
            .collect();
        assert_eq!(
            history,
            [("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
        );
    }

    #[test]
    fn test_reducers_run_in_registration_order() {
        let store = Store::builder()
            .reducer(
                "t",
                Reducer::new(|_, _, _| Ok(Some(json!({ "trail": ["first"] })))),
            )
            .reducer(
                "t",
                Reducer::new(|_, state, _| {
                    if let Some(trail) = state["trail"].as_array_mut() {
                        trail.push(json!("second"));
                    }
                    Ok(None)
                }),
            )
            .build()
            .unwrap();

        store.dispatch("t", Value::Null).unwrap();
        assert_eq!(store.get_state(), json!({ "trail": ["first", "second"] }));
    }

    #[test]
    fn test_multi_type_dispatch_runs_left_to_right() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("a", recorder.reducer())
            .reducer("b", recorder.reducer())
            .build()
            .unwrap();

        store.dispatch("b, a", json!(5)).unwrap();
        store.dispatch(["a", "b"], json!(6)).unwrap();

        let types: Vec<_> = recorder.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types, ["b", "a", "a", "b"]);
        assert_eq!(store.history_len(), 4);
    }

    #[test]
    fn test_pattern_dispatch_expands_registered_types() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("user.login", recorder.reducer())
            .reducer("admin.login", recorder.reducer())
            .reducer("user.logout", recorder.reducer())
            .build()
            .unwrap();

        store
            .dispatch(EventSelector::pattern("^user\\.").unwrap(), json!(1))
            .unwrap();

        let types: Vec<_> = recorder.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types, ["user.login", "user.logout"]);
    }

    #[test]
    fn test_structured_event_dispatch() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("add", recorder.reducer())
            .build()
            .unwrap();

        let event = json!({ "type": "add", "by": 2 });
        store
            .dispatch(EventSelector::event(event.clone()), Value::Null)
            .unwrap();

        assert_eq!(recorder.calls(), [("add".to_string(), event)]);
    }

    #[test]
    fn test_thunk_dispatch_receives_store() {
        let store = counter();
        store
            .dispatch(
                EventSelector::thunk(|s| {
                    s.dispatch("inc", json!(2))?.dispatch("inc", json!(3))?;
                    Ok(())
                }),
                Value::Null,
            )
            .unwrap();

        assert_eq!(store.get_state()["count"], 5);
    }

    #[test]
    fn test_empty_type_is_rejected() {
        let store = counter();
        assert!(matches!(
            store.dispatch(" , ", Value::Null),
            Err(StoreError::EmptyEventType)
        ));
        assert!(matches!(
            store.on("", inc()),
            Err(StoreError::EmptyEventType)
        ));
    }

    // ==========================================================================
    // Unknown types
    // ==========================================================================

    #[test]
    fn test_unknown_type_dispatches_missing() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(MISSING, recorder.reducer())
            .build()
            .unwrap();

        store.dispatch("foo", json!({ "x": 1 })).unwrap();

        assert_eq!(
            recorder.calls(),
            [(MISSING.to_string(), json!(["foo", { "x": 1 }]))]
        );
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_unknown_type_in_strict_mode() {
        let store = Store::builder()
            .config(StoreConfig::new().with_strict(true))
            .build()
            .unwrap();

        let err = store.dispatch("foo", Value::Null).unwrap_err();
        assert!(matches!(err, StoreError::UnknownType { ref event_type } if event_type == "foo"));
    }

    #[test]
    fn test_internal_types_never_missing_even_in_strict_mode() {
        let store = Store::builder()
            .config(StoreConfig::new().with_strict(true))
            .build()
            .unwrap();

        store.dispatch("_READY_", json!(true)).unwrap();
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_wildcard_makes_every_type_known() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(WILDCARD, recorder.reducer())
            .reducer(MISSING, Reducer::new(|_, _, _| panic!("should not be missing")))
            .build()
            .unwrap();

        store.dispatch("anything", json!(1)).unwrap();

        assert!(recorder
            .calls()
            .contains(&("anything".to_string(), json!(1))));
        assert_eq!(store.history_len(), 1);
    }

    // ==========================================================================
    // Reducer results
    // ==========================================================================

    #[test]
    fn test_return_value_overwrites_state() {
        let store = Store::builder()
            .reducer("replace", Reducer::new(|_, _, p| Ok(Some(p.clone()))))
            .state(json!({ "a": 1, "b": 2 }))
            .build()
            .unwrap();

        store.dispatch("replace", json!({ "c": 3 })).unwrap();
        assert_eq!(store.get_state(), json!({ "c": 3 }));
    }

    #[test]
    fn test_none_and_null_leave_state_alone() {
        let store = Store::builder()
            .reducer("none", Reducer::new(|_, _, _| Ok(None)))
            .reducer("null", Reducer::new(|_, _, _| Ok(Some(Value::Null))))
            .state(json!({ "a": 1 }))
            .build()
            .unwrap();

        store.dispatch("none, null", Value::Null).unwrap();
        assert_eq!(store.get_state(), json!({ "a": 1 }));
    }

    #[test]
    fn test_in_place_edit_is_kept() {
        let store = Store::builder()
            .reducer(
                "touch",
                Reducer::new(|_, state, _| {
                    state["touched"] = json!(true);
                    Ok(None)
                }),
            )
            .build()
            .unwrap();

        store.dispatch("touch", Value::Null).unwrap();
        assert_eq!(store.get_state(), json!({ "touched": true }));
    }

    #[test]
    fn test_ignore_return_values_mode() {
        let store = Store::builder()
            .reducer(
                "t",
                Reducer::new(|_, state, _| {
                    state["edited"] = json!(true);
                    Ok(Some(json!({ "replaced": true })))
                }),
            )
            .config(StoreConfig::new().with_ignore_return_values(true))
            .build()
            .unwrap();

        store.dispatch("t", Value::Null).unwrap();
        assert_eq!(store.get_state(), json!({ "edited": true }));
    }

    // ==========================================================================
    // Reducer failures
    // ==========================================================================

    #[test]
    fn test_reducer_error_dispatches_error_and_continues() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("boom", failing())
            .reducer("boom", inc())
            .reducer(ERROR, recorder.reducer())
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();

        store.dispatch("boom", json!(4)).unwrap();

        // The reducer after the failing one still ran
        assert_eq!(store.get_state()["count"], 4);
        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        let payload = &calls[0].1;
        assert!(payload[0].as_str().unwrap().contains("kaboom"));
        assert_eq!(payload[1], "boom");
        assert_eq!(payload[2], 4);
    }

    #[test]
    fn test_reducer_panic_is_reported_like_error() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("boom", Reducer::new(|_, _, _| panic!("intentional panic")))
            .reducer(ERROR, recorder.reducer())
            .build()
            .unwrap();

        store.dispatch("boom", Value::Null).unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1[0].as_str().unwrap().contains("intentional panic"));
    }

    #[test]
    fn test_failed_reducer_edits_are_discarded() {
        let store = Store::builder()
            .reducer(
                "boom",
                Reducer::new(|_, state, _| {
                    state["half"] = json!(true);
                    anyhow::bail!("nope")
                }),
            )
            .build()
            .unwrap();

        store.dispatch("boom", Value::Null).unwrap();
        assert_eq!(store.get_state(), json!({}));
    }

    #[test]
    fn test_throw_mode_propagates() {
        let store = Store::builder()
            .reducer("boom", failing())
            .config(StoreConfig::new().with_throw_on_error(true))
            .build()
            .unwrap();

        let err = store.dispatch("boom", Value::Null).unwrap_err();
        match err {
            StoreError::Reducer {
                event_type,
                reducer,
                source,
            } => {
                assert_eq!(event_type, "boom");
                assert_eq!(reducer, "explode");
                assert_eq!(source.to_string(), "kaboom");
            }
            other => panic!("Expected Reducer error, got {other:?}"),
        }
    }

    #[test]
    fn test_failing_error_reducer_does_not_recurse() {
        let calls = Rc::new(Cell::new(0));
        let counted = calls.clone();
        let store = Store::builder()
            .reducer("boom", failing())
            .reducer(
                ERROR,
                Reducer::new(move |_, _, _| {
                    counted.set(counted.get() + 1);
                    anyhow::bail!("error handler failed too")
                }),
            )
            .build()
            .unwrap();

        store.dispatch("boom", Value::Null).unwrap();
        assert_eq!(calls.get(), 1);
    }

    // ==========================================================================
    // on / off
    // ==========================================================================

    #[test]
    fn test_on_attaches_and_emits_on_event() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(ON, recorder.reducer())
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();

        let reducer = inc();
        store.on("inc, add", reducer.clone()).unwrap();
        store.dispatch("inc, add", Value::Null).unwrap();

        assert_eq!(store.get_state()["count"], 2);
        assert_eq!(
            recorder.payloads(ON),
            [
                json!(["inc", reducer.id()]),
                json!(["add", reducer.id()])
            ]
        );
    }

    #[test]
    fn test_on_many() {
        let store = Store::builder().state(json!({ "count": 0 })).build().unwrap();
        store.on_many([("a", inc()), ("b", inc())]).unwrap();
        store.dispatch("a, b", Value::Null).unwrap();
        assert_eq!(store.get_state()["count"], 2);
    }

    #[test]
    fn test_off_stops_reducer() {
        let store = counter();
        let extra = inc();
        store.on("inc", extra.clone()).unwrap();
        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(store.get_state()["count"], 2);

        assert!(store.off("inc", &extra).unwrap());
        assert!(!store.off("inc", &extra).unwrap());

        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(store.get_state()["count"], 3);
    }

    #[test]
    fn test_off_last_reducer_unregisters_type() {
        let recorder = Recorder::new();
        let reducer = inc();
        let store = Store::builder()
            .reducer("inc", reducer.clone())
            .reducer(MISSING, recorder.reducer())
            .build()
            .unwrap();

        assert!(store.off("inc", &reducer).unwrap());
        assert!(!store.registered_types().contains(&"inc".to_string()));

        store.dispatch("inc", json!(1)).unwrap();
        assert_eq!(recorder.payloads(MISSING), [json!(["inc", 1])]);
    }

    #[test]
    fn test_off_unknown_type_is_false_and_silent() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(OFF, recorder.reducer())
            .build()
            .unwrap();

        assert!(!store.off("nothing", &inc()).unwrap());
        assert_eq!(recorder.call_count(), 0);
    }

    #[test]
    fn test_off_all() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("t", inc())
            .reducer("t", inc())
            .reducer(OFF, recorder.reducer())
            .build()
            .unwrap();

        assert!(store.off_all("t").unwrap());
        assert_eq!(store.reducer_count("t"), 0);
        assert_eq!(recorder.payloads(OFF), [json!(["t", "*"])]);
    }

    #[test]
    fn test_off_during_dispatch_does_not_skip_siblings() {
        let recorder = Recorder::new();
        let store = Store::builder().build().unwrap();
        let first = Reducer::new(|ctx, _, _| {
            ctx.store().off_all(ctx.event_type())?;
            Ok(None)
        });
        store.on("t", first).unwrap();
        store.on("t", recorder.reducer()).unwrap();

        store.dispatch("t", json!(1)).unwrap();
        assert_eq!(recorder.call_count(), 1);

        store.dispatch("t", json!(2)).unwrap();
        assert_eq!(recorder.call_count(), 1);
    }

    // ==========================================================================
    // Flags
    // ==========================================================================

    #[test]
    fn test_flag_replays_to_late_reducer() {
        let store = Store::builder().build().unwrap();
        store.flag("ready", json!({ "at": 1 })).unwrap();

        let recorder = Recorder::new();
        store.on("ready", recorder.reducer()).unwrap();

        assert_eq!(recorder.payloads("ready"), [json!({ "at": 1 })]);
        assert_eq!(store.flagged("ready"), Some(json!({ "at": 1 })));
    }

    #[test]
    fn test_unflag_stops_replay() {
        let store = Store::builder().build().unwrap();
        store.flag("ready", json!(true)).unwrap();
        store.unflag("ready");

        let recorder = Recorder::new();
        store.on("ready", recorder.reducer()).unwrap();
        assert_eq!(recorder.call_count(), 0);
        assert_eq!(store.flagged("ready"), None);
    }

    // ==========================================================================
    // undo / reset / forget
    // ==========================================================================

    #[test]
    fn test_undo_matches_fresh_prefix() {
        let store = counter();
        for by in [1, 10, 100] {
            store.dispatch("inc", json!(by)).unwrap();
        }
        store.undo(1).unwrap();

        let fresh = counter();
        fresh.dispatch("inc", json!(1)).unwrap();
        fresh.dispatch("inc", json!(10)).unwrap();

        assert_eq!(store.get_state(), fresh.get_state());
        assert_eq!(store.history_len(), 2);
    }

    #[test]
    fn test_undo_more_than_history() {
        let store = counter();
        store.dispatch("inc", json!(5)).unwrap();
        store.undo(10).unwrap();
        assert_eq!(store.get_state(), json!({ "count": 0 }));
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_undo_zero_counts_as_one() {
        let store = counter();
        store.dispatch("inc", json!(1)).unwrap();
        store.dispatch("inc", json!(2)).unwrap();
        store.undo(0).unwrap();
        assert_eq!(store.get_state()["count"], 1);
    }

    #[test]
    fn test_reset_restores_original() {
        let recorder = Recorder::new();
        let store = counter();
        store.on(INIT, recorder.reducer()).unwrap();
        store.dispatch("inc", json!(3)).unwrap();
        store.dispatch("unknown", json!(3)).unwrap();

        store.reset().unwrap();
        assert_eq!(store.get_state(), json!({ "count": 0 }));
        assert_eq!(store.history_len(), 0);
        assert_eq!(recorder.call_count(), 1);

        store.reset().unwrap();
        assert_eq!(store.get_state(), json!({ "count": 0 }));
    }

    #[test]
    fn test_forget_rebaselines() {
        let store = counter();
        store.dispatch("inc", json!(3)).unwrap();
        store.forget().unwrap();
        assert_eq!(store.history_len(), 0);

        store.dispatch("inc", json!(1)).unwrap();
        store.reset().unwrap();
        assert_eq!(store.get_state()["count"], 3);
    }

    #[test]
    fn test_forget_history_mode() {
        let store = Store::builder()
            .reducer("inc", inc())
            .state(json!({ "count": 0 }))
            .config(StoreConfig::new().with_forget_history(true))
            .build()
            .unwrap();

        store.dispatch("inc", Value::Null).unwrap();
        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(store.get_state()["count"], 2);
        assert_eq!(store.history_len(), 0);
        assert!(!store.has_fired("inc"));
    }

    // ==========================================================================
    // Subscribers
    // ==========================================================================

    #[test]
    fn test_subscriber_receives_post_dispatch_state() {
        let recorder = Recorder::new();
        let store = counter();
        let _sub = store.subscribe(recorder.subscriber(), None).unwrap();
        recorder.clear();

        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(recorder.states(), [json!({ "count": 1 })]);
    }

    #[test]
    fn test_matcher_filters_notifications() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("a", inc())
            .reducer("b", inc())
            .build()
            .unwrap();
        let _sub = store
            .subscribe(recorder.subscriber(), Some(Matcher::pattern("^a$").unwrap()))
            .unwrap();

        store.dispatch("b", Value::Null).unwrap();
        assert_eq!(recorder.notifications(), 0);
        store.dispatch("a", Value::Null).unwrap();
        assert_eq!(recorder.notifications(), 1);
    }

    #[test]
    fn test_unsubscribe_via_handle() {
        let recorder = Recorder::new();
        let store = counter();
        let sub = store.subscribe(recorder.subscriber(), None).unwrap();
        assert_eq!(store.subscriber_count(), 1);

        sub.unsubscribe().unwrap();
        recorder.clear();
        assert_eq!(store.subscriber_count(), 0);

        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(recorder.notifications(), 0);
    }

    #[test]
    fn test_subscribe_dispatches_lifecycle_events() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer(SUBSCRIBE, recorder.reducer())
            .reducer(UNSUBSCRIBE, recorder.reducer())
            .build()
            .unwrap();

        let sub = store
            .subscribe(|_| {}, Some(Matcher::pattern("x").unwrap()))
            .unwrap();
        let id = sub.id();
        sub.unsubscribe().unwrap();

        assert_eq!(
            recorder.calls(),
            [
                (SUBSCRIBE.to_string(), json!([id, "x"])),
                (UNSUBSCRIBE.to_string(), json!([id])),
            ]
        );
    }

    #[test]
    fn test_builder_subscribers_are_notified() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("inc", inc())
            .state(json!({ "count": 0 }))
            .subscriber(recorder.subscriber(), Some(Matcher::types(["inc"])))
            .build()
            .unwrap();

        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(recorder.states(), [json!({ "count": 1 })]);
    }

    // ==========================================================================
    // Re-entrancy
    // ==========================================================================

    #[test]
    fn test_nested_dispatch_completes_first() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("inc", inc())
            .reducer(
                "double",
                Reducer::new(|ctx, _, _| {
                    ctx.dispatch("inc", json!(1))?;
                    ctx.dispatch("inc", json!(1))?;
                    Ok(None)
                }),
            )
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();
        let _sub = store.subscribe(recorder.subscriber(), None).unwrap();
        recorder.clear();

        store.dispatch("double", Value::Null).unwrap();

        // Nested changes survive the outer no-op reducer
        assert_eq!(store.get_state()["count"], 2);
        // Two nested notifications, then the outer one
        assert_eq!(
            recorder.states(),
            [
                json!({ "count": 1 }),
                json!({ "count": 2 }),
                json!({ "count": 2 })
            ]
        );
        let types: Vec<_> = store.history().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, ["double", "inc", "inc"]);
        let nested: Vec<_> = store.history().into_iter().map(|e| e.nested).collect();
        assert_eq!(nested, [false, true, true]);
    }

    #[test]
    fn test_dispatch_under_internal_event_is_top_level() {
        let store = Store::builder()
            .reducer("inc", inc())
            .reducer(
                MISSING,
                Reducer::new(|ctx, _, _| {
                    ctx.dispatch("inc", json!(1))?;
                    Ok(None)
                }),
            )
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();

        store.dispatch("unknown", Value::Null).unwrap();
        store.dispatch("inc", json!(10)).unwrap();
        let nested: Vec<_> = store.history().into_iter().map(|e| e.nested).collect();
        assert_eq!(nested, [false, false]);

        // The unknown dispatch left no entry, so its follow-up replays alone
        store.undo(1).unwrap();
        assert_eq!(store.get_state()["count"], 1);
        assert_eq!(store.history_len(), 1);
    }

    #[test]
    fn test_undo_inside_reducer_replays_top_level() {
        let store = Store::builder()
            .reducer("inc", inc())
            .reducer(
                "rewind",
                Reducer::new(|ctx, _, _| {
                    ctx.store().undo(1)?;
                    Ok(None)
                }),
            )
            .state(json!({ "count": 0 }))
            .build()
            .unwrap();

        store.dispatch("inc", json!(1)).unwrap();
        store.dispatch("inc", json!(2)).unwrap();
        // Undoing the running "rewind" leaves both increments replayed
        store.dispatch("rewind", Value::Null).unwrap();

        assert_eq!(store.get_state()["count"], 3);
        let nested: Vec<_> = store.history().into_iter().map(|e| e.nested).collect();
        assert_eq!(nested, [false, false]);
    }

    #[test]
    fn test_subscriber_may_dispatch() {
        let store = counter();
        let weak = store.downgrade();
        let _sub = store
            .subscribe(
                move |state| {
                    if state["count"] == 1 {
                        if let Some(store) = weak.upgrade() {
                            store.dispatch("inc", json!(10)).unwrap();
                        }
                    }
                },
                Some(Matcher::types(["inc"])),
            )
            .unwrap();

        store.dispatch("inc", Value::Null).unwrap();
        assert_eq!(store.get_state()["count"], 11);
    }

    // ==========================================================================
    // Introspection
    // ==========================================================================

    #[test]
    fn test_action_lookup() {
        let store = counter();
        let action = store.action("inc").unwrap();
        assert_eq!(action.event_type(), "inc");
        action.dispatch(json!(4)).unwrap();
        assert_eq!(store.get_state()["count"], 4);

        assert!(store.action("nope").is_none());
    }

    #[test]
    fn test_action_after_drop_is_noop() {
        let action = counter().action("inc").unwrap();
        assert!(action.dispatch(json!(1)).is_ok());
    }

    #[test]
    fn test_debug_publishes_only_when_configured() {
        let hidden = counter();
        let debug = format!("{:?}", hidden);
        assert!(debug.contains("Store"));
        assert!(!debug.contains("state"));
        assert!(!debug.contains("reducers"));

        let published = Store::builder()
            .reducer("inc", inc())
            .state(json!({ "count": 0 }))
            .config(StoreConfig::new().with_publish(true, true))
            .build()
            .unwrap();
        let debug = format!("{:?}", published);
        assert!(debug.contains("state"));
        assert!(debug.contains("\"count\""));
        assert!(debug.contains("reducers"));
    }

    #[test]
    fn test_get_property() {
        let store = counter();
        assert_eq!(store.get("count"), Some(json!(0)));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_weak_store_does_not_keep_alive() {
        let store = counter();
        let weak = store.downgrade();
        assert!(weak.upgrade().unwrap().ptr_eq(&store));
        drop(store);
        assert!(weak.upgrade().is_none());
    }

    // ==========================================================================
    // Deferred
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_deferred_notifications_collapse_bursts() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let recorder = Recorder::new();
                let store = Store::builder()
                    .reducer("inc", inc())
                    .state(json!({ "count": 0 }))
                    .config(
                        StoreConfig::new().with_deferred_notifications(Duration::from_millis(15)),
                    )
                    .build()
                    .unwrap();
                let _sub = store.subscribe(recorder.subscriber(), None).unwrap();

                for _ in 0..3 {
                    store.dispatch("inc", Value::Null).unwrap();
                }
                assert_eq!(recorder.notifications(), 0);
                assert!(store.has_pending_notification());

                tokio::time::sleep(Duration::from_millis(20)).await;

                assert_eq!(recorder.states(), [json!({ "count": 3 })]);
                assert!(!store.has_pending_notification());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_notification_waits_for_quiet_period() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let recorder = Recorder::new();
                let store = Store::builder()
                    .reducer("inc", inc())
                    .state(json!({ "count": 0 }))
                    .config(
                        StoreConfig::new().with_deferred_notifications(Duration::from_millis(15)),
                    )
                    .build()
                    .unwrap();
                let _sub = store.subscribe(recorder.subscriber(), None).unwrap();

                store.dispatch("inc", Value::Null).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.dispatch("inc", Value::Null).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(recorder.notifications(), 0);

                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(recorder.states(), [json!({ "count": 2 })]);
            })
            .await;
    }

    #[test]
    fn test_deferred_notifications_without_local_set_notify_now() {
        let recorder = Recorder::new();
        let store = Store::builder()
            .reducer("inc", inc())
            .state(json!({ "count": 0 }))
            .config(StoreConfig::new().with_deferred_notifications(Duration::from_millis(15)))
            .build()
            .unwrap();

        let _sub = store.subscribe(recorder.subscriber(), None).unwrap();
        store.dispatch("inc", Value::Null).unwrap();

        assert!(!store.has_pending_notification());
        assert_eq!(recorder.last_state(), Some(json!({ "count": 1 })));
    }

    #[test]
    fn test_deferred_dispatch_without_local_set_is_an_error() {
        let store = counter();
        let err = store
            .dispatch(EventSelector::deferred(async { "inc" }), json!(1))
            .unwrap_err();

        assert!(matches!(err, StoreError::NoLocalRuntime));
        assert_eq!(store.get_state()["count"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_dispatch_runs_on_resolution() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = counter();
                store
                    .dispatch(
                        EventSelector::deferred(async {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            "inc"
                        }),
                        json!(7),
                    )
                    .unwrap();
                assert_eq!(store.get_state()["count"], 0);

                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(store.get_state()["count"], 7);
            })
            .await;
    }
}
