//! Testing utilities for slate stores.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! slate = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Recording Reducer Calls and Notifications
//!
//! ```ignore
//! use slate::testing::Recorder;
//!
//! let recorder = Recorder::new();
//! let store = Store::builder()
//!     .reducer("_MISSING_", recorder.reducer())
//!     .subscriber(recorder.subscriber(), None)
//!     .build()?;
//!
//! store.dispatch("foo", json!(1))?;
//!
//! assert_eq!(recorder.payloads("_MISSING_"), [json!(["foo", 1])]);
//! assert_eq!(recorder.notifications(), 2); // _INIT_ and _MISSING_
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::reducer::Reducer;

/// Records what reducers and subscribers observe.
///
/// Clones share the same log, so a recorder can be handed to the store and
/// inspected afterwards.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Rc<RefCell<Vec<(String, Value)>>>,
    states: Rc<RefCell<Vec<Value>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reducer that logs `(event_type, payload)` and leaves state alone.
    ///
    /// Each call creates a distinct reducer; all of them log to this
    /// recorder.
    pub fn reducer(&self) -> Reducer {
        let calls = self.calls.clone();
        Reducer::named("recorder", move |ctx, _, payload| {
            calls
                .borrow_mut()
                .push((ctx.event_type().to_string(), payload.clone()));
            Ok(None)
        })
    }

    /// A subscriber handler that logs every state it is notified with.
    pub fn subscriber(&self) -> impl Fn(&Value) + 'static {
        let states = self.states.clone();
        move |state: &Value| states.borrow_mut().push(state.clone())
    }

    /// Every recorded `(event_type, payload)` in call order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Payloads recorded for one event type, in call order.
    pub fn payloads(&self, event_type: &str) -> Vec<Value> {
        self.calls
            .borrow()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Every state a subscriber was notified with.
    pub fn states(&self) -> Vec<Value> {
        self.states.borrow().clone()
    }

    pub fn last_state(&self) -> Option<Value> {
        self.states.borrow().last().cloned()
    }

    pub fn notifications(&self) -> usize {
        self.states.borrow().len()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
        self.states.borrow_mut().clear();
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("calls", &self.call_count())
            .field("notifications", &self.notifications())
            .finish()
    }
}
