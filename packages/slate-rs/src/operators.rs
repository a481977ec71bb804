//! Derived control operators.
//!
//! Everything here is composed from the public building blocks of the store
//! (`on`, `off`, `dispatch`, history and subscriptions); none of it has a
//! separate path through the dispatch engine.
//!
//! | Operator | Built on |
//! |----------|----------|
//! | `once`   | a wrapper reducer that detaches itself |
//! | `after`  | a waiting reducer, or `once` on the trigger event |
//! | `before` | a guarding reducer, or `once` on the trigger event |
//! | `when`   | an unfiltered subscription that unsubscribes itself |
//! | `watch`  | an unfiltered subscription comparing one property |
//! | `push`   | a forwarding reducer on this store |
//! | `pull`   | a forwarding reducer on the other store |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::core::{is_internal, split_types, ReducerId, SubscriberId};
use crate::error::{Result, StoreError};
use crate::reducer::Reducer;
use crate::store::{Store, WeakStore};
use crate::subscriber::{Subscriber, Subscription};

// =============================================================================
// Trigger
// =============================================================================

/// What `after` and `before` wait for.
#[derive(Clone)]
pub enum Trigger {
    /// An event type, checked against history and armed with `once`.
    Event(String),
    /// A predicate over `(state, payload)`, evaluated on every dispatch of
    /// the guarded type.
    Predicate(Rc<dyn Fn(&Value, &Value) -> bool>),
}

impl Trigger {
    /// Build a predicate trigger.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + 'static,
    {
        Self::Predicate(Rc::new(f))
    }
}

impl From<&str> for Trigger {
    fn from(event_type: &str) -> Self {
        Self::Event(event_type.to_string())
    }
}

impl From<String> for Trigger {
    fn from(event_type: String) -> Self {
        Self::Event(event_type)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Event(t) => f.debug_tuple("Event").field(t).finish(),
            Trigger::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// =============================================================================
// Link
// =============================================================================

/// A forwarding link created by [`Store::push`] or [`Store::pull`].
///
/// Holds only a weak reference to the store carrying the forwarding reducer,
/// so a link never keeps either store alive.
#[derive(Debug, Clone)]
pub struct Link {
    store: WeakStore,
    event_type: String,
    reducer: ReducerId,
}

impl Link {
    /// The forwarded type(s).
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Tear down this link only.
    ///
    /// Returns whether anything was detached; `false` once the link is
    /// already cancelled or its store has been dropped.
    pub fn cancel(&self) -> Result<bool> {
        match self.store.upgrade() {
            Some(store) => store.off_id(&self.event_type, self.reducer),
            None => Ok(false),
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

impl Store {
    /// Attach a reducer that detaches itself after its first run, per type.
    pub fn once(&self, types: &str, reducer: Reducer) -> Result<&Self> {
        let types = split_types(types);
        if types.is_empty() {
            return Err(StoreError::EmptyEventType);
        }
        for event_type in types {
            let wrapper = once_wrapper(event_type.clone(), reducer.clone());
            self.on(&event_type, wrapper)?;
        }
        Ok(self)
    }

    /// Keep `reducer` inert until `trigger` has happened, then attach it
    /// permanently and run it once right away.
    ///
    /// - Event trigger already in history: attach immediately.
    /// - Event trigger not yet seen: on the first dispatch of the trigger,
    ///   attach and run `reducer` with the trigger's payload.
    /// - Predicate trigger: on the first dispatch of a type for which the
    ///   predicate holds, attach and run `reducer` for that dispatch.
    pub fn after(&self, types: &str, trigger: impl Into<Trigger>, reducer: Reducer) -> Result<&Self> {
        let targets = split_types(types);
        if targets.is_empty() {
            return Err(StoreError::EmptyEventType);
        }
        match trigger.into() {
            Trigger::Predicate(predicate) => {
                for event_type in targets {
                    let waiting = after_predicate(event_type.clone(), predicate.clone(), reducer.clone());
                    self.on(&event_type, waiting)?;
                }
                Ok(self)
            }
            Trigger::Event(trigger) => {
                if self.has_fired(&trigger) {
                    return self.on(types, reducer);
                }
                debug!(trigger = %trigger, types, "arming after trigger");
                let types = types.to_string();
                let name = reducer.name();
                self.once(
                    &trigger,
                    Reducer::named(name, move |ctx, state, payload| {
                        ctx.store().on(&types, reducer.clone())?;
                        reducer.call(ctx, state, payload)
                    }),
                )
            }
        }
    }

    /// Keep `reducer` active only until `trigger` happens.
    ///
    /// - Event trigger already in history: nothing is attached.
    /// - Event trigger not yet seen: attach now; the first dispatch of the
    ///   trigger detaches it.
    /// - Predicate trigger: run `reducer` on every dispatch until the
    ///   predicate holds, then detach for good without running it.
    pub fn before(&self, types: &str, trigger: impl Into<Trigger>, reducer: Reducer) -> Result<&Self> {
        let targets = split_types(types);
        if targets.is_empty() {
            return Err(StoreError::EmptyEventType);
        }
        match trigger.into() {
            Trigger::Predicate(predicate) => {
                for event_type in targets {
                    let guarding = before_predicate(event_type.clone(), predicate.clone(), reducer.clone());
                    self.on(&event_type, guarding)?;
                }
                Ok(self)
            }
            Trigger::Event(trigger) => {
                if self.has_fired(&trigger) {
                    debug!(trigger = %trigger, types, "before trigger already fired, not attaching");
                    return Ok(self);
                }
                self.on(types, reducer.clone())?;
                let types = types.to_string();
                self.once(
                    &trigger,
                    Reducer::named("before", move |ctx, _, _| {
                        ctx.store().off(&types, &reducer)?;
                        Ok(None)
                    }),
                )
            }
        }
    }

    /// Dispatch `target_type` with `target_payload` once, the first time
    /// `state[property]` equals `expected`, then unsubscribe.
    ///
    /// An array `expected` matches any of its elements. A missing property
    /// never matches. A condition already true fires during registration.
    pub fn when(
        &self,
        property: &str,
        expected: Value,
        target_type: &str,
        target_payload: Value,
    ) -> Result<Subscription> {
        let candidates = match expected {
            Value::Array(values) => values,
            value => vec![value],
        };
        let id = SubscriberId::new();
        let store = self.downgrade();
        let property = property.to_string();
        let target_type = target_type.to_string();
        let fired = Cell::new(false);

        let handler = move |state: &Value| {
            if fired.get() {
                return;
            }
            let Some(current) = state.get(&property) else {
                return;
            };
            if !candidates.contains(current) {
                return;
            }
            fired.set(true);

            let Some(store) = store.upgrade() else {
                return;
            };
            debug!(property = %property, target = %target_type, "when condition met");
            if let Err(e) = store.unsubscribe(id) {
                warn!(error = %e, subscriber = %id, "when failed to unsubscribe");
            }
            if let Err(e) = store.dispatch(target_type.as_str(), target_payload.clone()) {
                warn!(error = %e, target = %target_type, "when dispatch failed");
            }
        };

        self.add_subscriber(Subscriber::new(id, handler, None))
    }

    /// Dispatch `target_type` with `{property, was, now}` whenever
    /// `state[property]` changes. A missing property reads as `null`.
    ///
    /// Changes made while its own dispatch runs are absorbed rather than
    /// reported again.
    pub fn watch(&self, property: &str, target_type: &str) -> Result<Subscription> {
        let store = self.downgrade();
        let property = property.to_string();
        let target_type = target_type.to_string();
        let last = RefCell::new(self.get(&property).unwrap_or(Value::Null));
        let firing = Cell::new(false);

        let handler = move |state: &Value| {
            if firing.get() {
                return;
            }
            let now = state.get(&property).cloned().unwrap_or(Value::Null);
            if *last.borrow() == now {
                return;
            }
            let was = last.replace(now.clone());

            let Some(store) = store.upgrade() else {
                return;
            };
            firing.set(true);
            let result = store.dispatch(
                target_type.as_str(),
                json!({ "property": property, "was": was, "now": now }),
            );
            firing.set(false);
            *last.borrow_mut() = store.get(&property).unwrap_or(Value::Null);

            if let Err(e) = result {
                warn!(error = %e, target = %target_type, "watch dispatch failed");
            }
        };

        self.add_subscriber(Subscriber::new(SubscriberId::new(), handler, None))
    }

    /// Forward local dispatches of `event_type` to `other`.
    pub fn push(&self, event_type: &str, other: &Store) -> Result<Link> {
        let explicit = split_types(event_type);
        if explicit.is_empty() {
            return Err(StoreError::EmptyEventType);
        }
        let target = other.downgrade();
        let forwarder = Reducer::named("push", move |ctx, _, payload| {
            let forwarded = ctx.event_type();
            // A wildcard link does not leak lifecycle events
            if is_internal(forwarded) && !explicit.iter().any(|t| t == forwarded) {
                return Ok(None);
            }
            if let Some(target) = target.upgrade() {
                target.dispatch(forwarded, payload.clone())?;
            }
            Ok(None)
        });

        let link = Link {
            store: self.downgrade(),
            event_type: event_type.to_string(),
            reducer: forwarder.id(),
        };
        self.on(event_type, forwarder)?;
        Ok(link)
    }

    /// Forward `other`'s dispatches of `event_type` into this store.
    pub fn pull(&self, event_type: &str, other: &Store) -> Result<Link> {
        other.push(event_type, self)
    }
}

fn once_wrapper(event_type: String, reducer: Reducer) -> Reducer {
    let id = ReducerId::new();
    let fired = Cell::new(false);
    Reducer::with_id(id, reducer.name(), move |ctx, state, payload| {
        if fired.replace(true) {
            return Ok(None);
        }
        ctx.store().off_id(&event_type, id)?;
        reducer.call(ctx, state, payload)
    })
}

fn after_predicate(
    event_type: String,
    predicate: Rc<dyn Fn(&Value, &Value) -> bool>,
    reducer: Reducer,
) -> Reducer {
    let id = ReducerId::new();
    let waiting = Cell::new(true);
    Reducer::with_id(id, "after", move |ctx, state, payload| {
        if !waiting.get() || !predicate(state, payload) {
            return Ok(None);
        }
        waiting.set(false);
        let store = ctx.store();
        store.off_id(&event_type, id)?;
        store.on(&event_type, reducer.clone())?;
        reducer.call(ctx, state, payload)
    })
}

fn before_predicate(
    event_type: String,
    predicate: Rc<dyn Fn(&Value, &Value) -> bool>,
    reducer: Reducer,
) -> Reducer {
    let id = ReducerId::new();
    let active = Cell::new(true);
    Reducer::with_id(id, reducer.name(), move |ctx, state, payload| {
        if !active.get() {
            return Ok(None);
        }
        if predicate(state, payload) {
            active.set(false);
            ctx.store().off_id(&event_type, id)?;
            return Ok(None);
        }
        reducer.call(ctx, state, payload)
    })
}
