//! Model definition and the store that runs it.
//!
//! A [`Model`] is the static description of a store: initial state, reducers,
//! effects and tuning. [`Model::build`] (or [`Store::new`]) turns it into a
//! running [`Store`] with its own state, pending table, action channel and
//! effect router.
//!
//! # Dispatch
//!
//! [`Store::dispatch`] is the single entry point. For each call it:
//!
//! 1. issues a correlation id from the store's own counter,
//! 2. registers a pending entry if an effect is bound to the action type,
//! 3. applies the action to the state synchronously,
//! 4. queues the tagged action for the router if an effect is bound to it,
//!    and emits it on the broadcast channel for `take` and other observers.
//!
//! Because the state is committed before the action is emitted, an effect
//! always observes the state transition of the action that triggered it.
//! The routing queue exists from the moment the store is built and is
//! unbounded, so no bound action is ever skipped.
//!
//! # Lifetime
//!
//! Handles returned by [`Model::build`] and their clones own the store. When
//! the last of them is dropped the store shuts down as if
//! [`Store::dispose`] had been called. The handle an effect reaches through
//! its context does not count as an owner, so a long-running effect cannot
//! keep an abandoned store alive.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Clone, Default)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! let store = Model::new(Counter::default())
//!     .effects(EffectMap::new().effect(
//!         "increment",
//!         |_action, ctx: EffectContext<Counter>| async move {
//!             ctx.set(|draft: &mut Counter| draft.count += 1);
//!             Ok("done")
//!         },
//!     ))
//!     .build();
//!
//! assert_eq!(store.dispatch(Action::new("increment")).await?, json!("done"));
//! assert_eq!(store.get_state().count, 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::ActionBus;
use crate::config::StoreConfig;
use crate::core::{Action, ActionEnvelope, StoreState, SET_ACTION_TYPE};
use crate::effect_map::{EffectDescriptor, EffectMap};
use crate::error::StoreError;
use crate::pending::{PendingTable, Settlement};
use crate::reducer::{DraftReducer, Mutator, ReducerMap, ReducerMode, Transition};
use crate::router::{RouteTable, Router};

/// Static description of a store.
///
/// Cheap to clone. The flattened effect list is computed once per effect map
/// and shared by every store built from the model.
pub struct Model<S: StoreState> {
    state: S,
    reducers: ReducerMap<S>,
    effects: Arc<EffectMap<S>>,
    descriptors: Arc<OnceLock<Arc<[EffectDescriptor<S>]>>>,
    mode: ReducerMode,
    config: StoreConfig,
}

impl<S: StoreState> Model<S> {
    /// Create a model with no reducers and no effects.
    pub fn new(state: S) -> Self {
        Self {
            state,
            reducers: ReducerMap::new(),
            effects: Arc::new(EffectMap::new()),
            descriptors: Arc::new(OnceLock::new()),
            mode: ReducerMode::Draft,
            config: StoreConfig::default(),
        }
    }

    /// Set the reducer map.
    pub fn reducer(mut self, reducers: ReducerMap<S>) -> Self {
        self.reducers = reducers;
        self
    }

    /// Set the effect map.
    pub fn effects(mut self, effects: EffectMap<S>) -> Self {
        self.effects = Arc::new(effects);
        self.descriptors = Arc::new(OnceLock::new());
        self
    }

    /// Treat reducers as plain value-to-value functions.
    ///
    /// Only [`Mutation::Replace`](crate::Mutation::Replace) commits; in-place
    /// mutation of the draft is discarded.
    pub fn disable_drafts(mut self) -> Self {
        self.mode = ReducerMode::Plain;
        self
    }

    /// Set the store tuning.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// How reducers commit.
    pub fn mode(&self) -> ReducerMode {
        self.mode
    }

    /// Store tuning.
    pub fn store_config(&self) -> &StoreConfig {
        &self.config
    }

    /// Flattened effects, computed on first use.
    pub fn descriptors(&self) -> Arc<[EffectDescriptor<S>]> {
        Arc::clone(
            self.descriptors
                .get_or_init(|| self.effects.flatten().into()),
        )
    }

    /// Start a store. Must be called inside a tokio runtime.
    pub fn build(&self) -> Store<S> {
        Store::new(self)
    }
}

impl<S: StoreState> Clone for Model<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            reducers: self.reducers.clone(),
            effects: Arc::clone(&self.effects),
            descriptors: Arc::clone(&self.descriptors),
            mode: self.mode,
            config: self.config.clone(),
        }
    }
}

impl<S: StoreState> fmt::Debug for Model<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("reducers", &self.reducers)
            .field("effects", &self.effects)
            .field("mode", &self.mode)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A running store.
///
/// Cloning yields another handle to the same store. The store runs until
/// [`dispose`](Self::dispose) is called or the last owning handle is
/// dropped; see the module docs for which handles own it.
pub struct Store<S: StoreState> {
    inner: Arc<StoreInner<S>>,
    owner: Option<Arc<OwnerLease<S>>>,
}

pub(crate) struct StoreInner<S: StoreState> {
    state: watch::Sender<Arc<S>>,
    reducer: DraftReducer<S>,
    bus: ActionBus,
    queue: mpsc::UnboundedSender<ActionEnvelope>,
    pending: PendingTable,
    routes: Arc<RouteTable<S>>,
    shutdown: watch::Sender<bool>,
    config: StoreConfig,
}

impl<S: StoreState> Store<S> {
    /// Start a store for `model`. Must be called inside a tokio runtime.
    pub fn new(model: &Model<S>) -> Self {
        let config = model.store_config().clone();
        let descriptors = model.descriptors();
        let routes = Arc::new(RouteTable::new(&descriptors));

        let bus = ActionBus::with_capacity(config.bus_capacity);
        let (queue, queued) = mpsc::unbounded_channel();

        let (state, _) = watch::channel(Arc::new(model.state().clone()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(StoreInner {
            state,
            reducer: DraftReducer::new(model.reducers.clone(), model.mode()),
            bus,
            queue,
            pending: PendingTable::new(),
            routes: Arc::clone(&routes),
            shutdown,
            config,
        });

        let router = Router::new(Arc::downgrade(&inner), routes, queued, shutdown_rx);
        tokio::spawn(router.run());

        info!(
            effects = descriptors.len(),
            reducers = inner.reducer.reducer_count(),
            mode = ?inner.reducer.mode(),
            "store started"
        );

        let owner = Some(Arc::new(OwnerLease {
            inner: Arc::downgrade(&inner),
        }));
        Self { inner, owner }
    }

    /// A handle that does not keep the store running.
    pub(crate) fn from_inner(inner: Arc<StoreInner<S>>) -> Self {
        Self { inner, owner: None }
    }

    /// Returns true if this handle keeps the store running.
    pub fn is_owner(&self) -> bool {
        self.owner.is_some()
    }

    /// Dispatch an action.
    ///
    /// The state transition is applied before this returns. The returned
    /// settlement resolves with the value of the effect bound to the action's
    /// type, or `Value::Null` right away if none is bound.
    ///
    /// The settlement fails with [`StoreError::EmptyActionType`] for an empty
    /// type and with [`StoreError::Disposed`] once the store is disposed.
    /// Nothing bounds the wait; see [`dispatch_timeout`](Self::dispatch_timeout).
    ///
    /// # Panics
    ///
    /// A panicking reducer unwinds out of this call. Its draft is discarded:
    /// the committed state, the action channel and the pending table are left
    /// as they were before the call, and the store stays usable.
    pub fn dispatch(&self, action: Action) -> Settlement {
        let inner = &self.inner;
        let cid = inner.pending.next_id();

        if action.action_type.is_empty() {
            return Settlement::ready(cid, Err(StoreError::EmptyActionType));
        }
        if self.is_disposed() {
            debug!(%cid, action_type = %action.action_type, "dispatch after dispose");
            return Settlement::ready(cid, Err(StoreError::Disposed));
        }

        debug!(%cid, action_type = %action.action_type, "dispatch");

        inner.reduce(Transition::Action(&action));

        let settlement = if inner.routes.is_bound(&action.action_type) {
            inner.pending.register(cid)
        } else {
            Settlement::ready(cid, Ok(Value::Null))
        };

        inner.emit(ActionEnvelope::new(cid, action));

        // Lost a race with dispose: make sure the caller is not left waiting.
        if self.is_disposed() {
            inner.pending.evict(cid);
        }
        settlement
    }

    /// Dispatch and wait at most `duration` for the result.
    ///
    /// On expiry the pending entry is evicted and the call fails with
    /// [`StoreError::Timeout`]. The effect keeps running; its result is
    /// discarded.
    pub async fn dispatch_timeout(
        &self,
        action: Action,
        duration: Duration,
    ) -> Result<Value, StoreError> {
        let settlement = self.dispatch(action);
        let cid = settlement.correlation_id();

        match tokio::time::timeout(duration, settlement).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.inner.pending.evict(cid);
                warn!(%cid, timeout_ms = duration.as_millis() as u64, "dispatch timed out");
                Err(StoreError::Timeout { duration })
            }
        }
    }

    /// Dispatch and wait for the result, bounded by the configured timeout.
    pub async fn dispatch_and_await(&self, action: Action) -> Result<Value, StoreError> {
        self.dispatch_timeout(action, self.inner.config.dispatch_timeout)
            .await
    }

    /// Apply a set mutation and announce it on the channel.
    pub(crate) fn commit_set(&self, mutator: Mutator<S>) {
        if self.is_disposed() {
            debug!("set after dispose ignored");
            return;
        }

        self.inner.reduce(Transition::Set(mutator));

        let cid = self.inner.pending.next_id();
        self.inner
            .emit(ActionEnvelope::new(cid, Action::new(SET_ACTION_TYPE)));
    }

    /// Latest committed state.
    pub fn get_state(&self) -> Arc<S> {
        Arc::clone(&self.inner.state.borrow())
    }

    /// Project the latest committed state.
    pub fn select<T>(&self, selector: impl FnOnce(&S) -> T) -> T {
        selector(&self.inner.state.borrow())
    }

    /// Watch committed states.
    ///
    /// The receiver is marked changed after every commit that ran a reducer.
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.inner.state.subscribe()
    }

    /// Receive every action emitted from now on, tagged with its correlation id.
    ///
    /// This is a broadcast receiver with the configured bus capacity. A
    /// receiver that falls further behind than that misses actions and gets
    /// `RecvError::Lagged`. Effect routing does not go through it.
    pub fn subscribe_actions(&self) -> broadcast::Receiver<ActionEnvelope> {
        self.inner.bus.subscribe()
    }

    /// Number of dispatches still waiting for their effect.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns true if an effect is bound to `action_type`.
    pub fn is_bound(&self, action_type: &str) -> bool {
        self.inner.routes.is_bound(action_type)
    }

    /// Store tuning in effect.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns true once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Tear the store down.
    ///
    /// Stops the router, cancels every running effect and forked task, and
    /// fails every waiting dispatch with [`StoreError::Disposed`]. Calling it
    /// again is a no-op.
    pub fn dispose(&self) {
        if self.inner.shutdown_now() {
            info!("store disposed");
        }
    }

    pub(crate) fn pending(&self) -> &PendingTable {
        &self.inner.pending
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Spawn a task that is cancelled when the store is disposed or dropped.
    ///
    /// The handle yields `None` if the task was cancelled that way.
    pub(crate) fn spawn_scoped<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => None,
                output = future => Some(output),
            }
        })
    }
}

impl<S: StoreState> StoreInner<S> {
    /// Queue `envelope` for the router if an effect is bound to its type,
    /// then broadcast it.
    fn emit(&self, envelope: ActionEnvelope) {
        if self.routes.is_bound(envelope.action_type()) {
            // Fails only once the router has stopped, after shutdown.
            let _ = self.queue.send(envelope.clone());
        }
        self.bus.emit(envelope);
    }

    /// Run one transition against the committed state.
    ///
    /// Runs under the state lock: reducers and mutators must not read the
    /// store. A panicking transition leaves the state and its watchers
    /// untouched and unwinds to the caller.
    fn reduce(&self, transition: Transition<'_, S>) {
        self.state
            .send_if_modified(|state| self.reducer.apply(state, transition));
    }

    /// Signal shutdown and drop pending entries. Returns false if the store
    /// was already shut down.
    fn shutdown_now(&self) -> bool {
        if self.shutdown.send_replace(true) {
            return false;
        }
        self.pending.clear();
        true
    }
}

impl<S: StoreState> Drop for StoreInner<S> {
    fn drop(&mut self) {
        if self.shutdown_now() {
            debug!("store dropped without dispose");
        }
    }
}

/// Shuts the store down when the last owning handle goes away.
struct OwnerLease<S: StoreState> {
    inner: Weak<StoreInner<S>>,
}

impl<S: StoreState> Drop for OwnerLease<S> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.shutdown_now() {
            debug!("last owning handle dropped, store shut down");
        }
    }
}

/// Resolve once `shutdown` turns true or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl<S: StoreState> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            owner: self.owner.clone(),
        }
    }
}

impl<S: StoreState> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("pending", &self.inner.pending.len())
            .field("bound_types", &self.inner.routes.len())
            .field("disposed", &self.is_disposed())
            .field("owner", &self.is_owner())
            .finish_non_exhaustive()
    }
}
