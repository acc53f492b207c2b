//! Draft-merge reducers.
//!
//! A reducer is registered per action type and receives a mutable draft of
//! the current state. It either mutates the draft in place or hands back a
//! replacement:
//!
//! ```ignore
//! let reducers = ReducerMap::new()
//!     .on("increment", |draft: &mut Counter, _: &Action| draft.count += 1)
//!     .on("reset", |_: &mut Counter, _: &Action| Mutation::Replace(Counter::default()));
//! ```
//!
//! # Drafts
//!
//! The committed state is an `Arc<S>` snapshot. In [`ReducerMode::Draft`] the
//! reducer mutates a copy of that snapshot, and the copy is committed only
//! once the reducer returns. A reducer that panics halfway leaves the
//! committed state untouched, and readers holding the previous snapshot (an
//! effect that called `get_state`, a UI subscriber) never see it change
//! underneath them.
//!
//! In [`ReducerMode::Plain`] there is no draft to keep. Reducers still get a
//! scratch copy to satisfy the signature, but only [`Mutation::Replace`]
//! commits anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::core::{qualified_type, Action, SET_ACTION_TYPE};

/// Outcome of running a reducer on a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<S> {
    /// Keep the draft, including whatever was mutated in place.
    Keep,
    /// Commit this value instead of the draft.
    Replace(S),
}

impl<S> Mutation<S> {
    /// Returns true for [`Mutation::Keep`].
    pub fn is_keep(&self) -> bool {
        matches!(self, Mutation::Keep)
    }
}

impl<S> From<()> for Mutation<S> {
    fn from(_: ()) -> Self {
        Mutation::Keep
    }
}

/// A registered reducer.
pub type ReducerFn<S> = Arc<dyn Fn(&mut S, &Action) -> Mutation<S> + Send + Sync>;

/// A one-shot draft mutation, as carried by the built-in set action.
pub type Mutator<S> = Box<dyn FnOnce(&mut S) -> Mutation<S> + Send>;

/// Map from action type to reducer.
pub struct ReducerMap<S> {
    handlers: HashMap<String, ReducerFn<S>>,
}

impl<S: 'static> ReducerMap<S> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a reducer for `action_type`, replacing any previous one.
    ///
    /// The closure may return `()` (mutate the draft) or a [`Mutation`].
    pub fn on<F, R>(mut self, action_type: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&mut S, &Action) -> R + Send + Sync + 'static,
        R: Into<Mutation<S>>,
    {
        let reducer: ReducerFn<S> =
            Arc::new(move |draft: &mut S, action: &Action| reducer(draft, action).into());
        self.handlers.insert(action_type.into(), reducer);
        self
    }

    /// Merge `child` under `scope`, so its `"loaded"` becomes `"scope/loaded"`.
    pub fn nest(mut self, scope: &str, child: ReducerMap<S>) -> Self {
        let scope = [scope.to_string()];
        for (action_type, reducer) in child.handlers {
            self.handlers
                .insert(qualified_type(&scope, &action_type), reducer);
        }
        self
    }

    /// Look up the reducer for `action_type`.
    pub fn get(&self, action_type: &str) -> Option<&ReducerFn<S>> {
        self.handlers.get(action_type)
    }

    /// Returns true if a reducer is registered for `action_type`.
    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Number of registered reducers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no reducer is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S: 'static> Default for ReducerMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for ReducerMap<S> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<S> fmt::Debug for ReducerMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("ReducerMap").field("types", &types).finish()
    }
}

/// How reducers commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReducerMode {
    /// Reducers mutate a draft copy that is committed when they return.
    #[default]
    Draft,
    /// Reducers are value-to-value; only replacements commit.
    Plain,
}

/// Input to one reducer step.
pub(crate) enum Transition<'a, S> {
    /// A dispatched action, looked up in the reducer map.
    Action(&'a Action),
    /// The built-in set action with its mutator.
    Set(Mutator<S>),
}

/// Applies transitions to the committed state.
pub(crate) struct DraftReducer<S> {
    reducers: ReducerMap<S>,
    mode: ReducerMode,
}

impl<S: Clone + 'static> DraftReducer<S> {
    pub(crate) fn new(reducers: ReducerMap<S>, mode: ReducerMode) -> Self {
        Self { reducers, mode }
    }

    pub(crate) fn mode(&self) -> ReducerMode {
        self.mode
    }

    pub(crate) fn reducer_count(&self) -> usize {
        self.reducers.len()
    }

    /// Apply one transition. Returns true if a mutation ran.
    ///
    /// The built-in set type is checked before the reducer map, so a user
    /// reducer registered under [`SET_ACTION_TYPE`] is never called.
    pub(crate) fn apply(&self, state: &mut Arc<S>, transition: Transition<'_, S>) -> bool {
        match transition {
            Transition::Set(mutator) => {
                self.commit(state, mutator);
                true
            }
            Transition::Action(action) if action.action_type == SET_ACTION_TYPE => {
                warn!("set action dispatched without a mutator, state unchanged");
                false
            }
            Transition::Action(action) => match self.reducers.get(&action.action_type) {
                Some(reducer) => {
                    self.commit(state, |draft: &mut S| reducer(draft, action));
                    true
                }
                None => false,
            },
        }
    }

    /// Run `mutation` on a copy of the state and swap the result in.
    ///
    /// Nothing is written to `state` until `mutation` has returned, so an
    /// unwinding mutation discards its draft.
    fn commit<F>(&self, state: &mut Arc<S>, mutation: F)
    where
        F: FnOnce(&mut S) -> Mutation<S>,
    {
        let mut draft = S::clone(state);
        match (mutation(&mut draft), self.mode) {
            (Mutation::Replace(next), _) => *state = Arc::new(next),
            (Mutation::Keep, ReducerMode::Draft) => *state = Arc::new(draft),
            (Mutation::Keep, ReducerMode::Plain) => {}
        }
    }
}
