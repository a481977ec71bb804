//! Subscribers - observe post-dispatch state without taking part in reduction.
//!
//! Subscribers provide a first-class way to react to state changes for:
//! - Rendering or pushing state to a view
//! - Logging and auditing
//! - Derived triggers such as `when` and `watch`
//!
//! # Execution Order
//!
//! Subscribers run **after** reducers:
//!
//! ```text
//! dispatch(type, payload)
//!  → resolve types
//!  → reducers (fold payload into state)
//!  → history
//!  → subscribers   ← here (observe the new state)
//! ```
//!
//! A subscriber may carry a [`Matcher`] that restricts which event types
//! notify it.

use std::fmt;
use std::rc::Rc;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::SubscriberId;
use crate::error::Result;
use crate::store::WeakStore;

// =============================================================================
// Matcher
// =============================================================================

/// Restricts which event types notify a subscriber.
#[derive(Clone)]
pub enum Matcher {
    /// Notify when the predicate accepts the type.
    Predicate(Rc<dyn Fn(&str) -> bool>),
    /// Notify when the pattern matches anywhere in the type.
    Pattern(Regex),
}

impl Matcher {
    /// Build a predicate matcher.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + 'static,
    {
        Self::Predicate(Rc::new(f))
    }

    /// Build a pattern matcher from a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    /// Build a matcher accepting exactly the given types.
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        Self::predicate(move |t| types.iter().any(|candidate| candidate == t))
    }

    /// Check whether a dispatch of `event_type` should notify.
    pub fn accepts(&self, event_type: &str) -> bool {
        match self {
            Matcher::Predicate(f) => f(event_type),
            Matcher::Pattern(p) => p.is_match(event_type),
        }
    }

    /// JSON description used in `_SUBSCRIBE_` payloads.
    pub(crate) fn describe(&self) -> Value {
        match self {
            Matcher::Predicate(_) => json!("predicate"),
            Matcher::Pattern(p) => json!(p.as_str()),
        }
    }
}

impl From<Regex> for Matcher {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
            Matcher::Pattern(p) => f.debug_tuple("Pattern").field(&p.as_str()).finish(),
        }
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// Type-erased subscriber entry.
#[derive(Clone)]
pub(crate) struct Subscriber {
    id: SubscriberId,
    handler: Rc<dyn Fn(&Value)>,
    matcher: Option<Matcher>,
    name: &'static str,
}

impl Subscriber {
    pub fn new<F>(id: SubscriberId, handler: F, matcher: Option<Matcher>) -> Self
    where
        F: Fn(&Value) + 'static,
    {
        Self {
            id,
            handler: Rc::new(handler),
            matcher,
            name: std::any::type_name::<F>(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        self.matcher.as_ref()
    }

    /// Whether a dispatch of `event_type` should reach this subscriber.
    pub fn wants(&self, event_type: &str) -> bool {
        self.matcher.as_ref().map_or(true, |m| m.accepts(event_type))
    }

    pub fn notify(&self, state: &Value) {
        (self.handler)(state)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish()
    }
}

// =============================================================================
// Subscriber Pool
// =============================================================================

/// Ordered subscriber entries.
#[derive(Default)]
pub(crate) struct SubscriberPool {
    subscribers: Vec<Subscriber>,
}

impl SubscriberPool {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn add(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id() != id);
        self.subscribers.len() != before
    }

    /// Snapshot of the subscribers a dispatch of `event_type` notifies.
    pub fn matching(&self, event_type: &str) -> Vec<Subscriber> {
        self.subscribers
            .iter()
            .filter(|s| s.wants(event_type))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for SubscriberPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberPool")
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Handle returned by `subscribe`, `when` and `watch`.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe later"]
#[derive(Debug, Clone)]
pub struct Subscription {
    store: WeakStore,
    id: SubscriberId,
}

impl Subscription {
    pub(crate) fn new(store: WeakStore, id: SubscriberId) -> Self {
        Self { store, id }
    }

    /// The subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the subscriber from its store.
    ///
    /// A no-op once the store has been dropped.
    pub fn unsubscribe(self) -> Result<()> {
        match self.store.upgrade() {
            Some(store) => store.unsubscribe(self.id).map(|_| ()),
            None => Ok(()),
        }
    }
}
