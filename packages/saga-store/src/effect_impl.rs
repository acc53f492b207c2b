//! Effect trait and the capability object handed to every effect run.
//!
//! Effects are async workflows bound to an action type. They receive the
//! action that triggered them (without its correlation metadata) and an
//! [`EffectContext`] carrying everything they are allowed to do:
//!
//! | capability              | what it does                                        |
//! |-------------------------|-----------------------------------------------------|
//! | [`put`]                 | dispatch an action, scoped, without waiting         |
//! | [`put_resolve`]         | dispatch an action and await its result             |
//! | [`set`]                 | mutate the state through the reserved set action    |
//! | [`get_state`]/[`select`]| read the latest committed state                     |
//! | [`take`]                | wait for the next action of a given type            |
//! | [`delay`]               | sleep                                               |
//! | [`spawn`]               | fork a child task that dies with the store          |
//!
//! Whatever the effect returns settles the dispatch that started it.
//!
//! [`put`]: EffectContext::put
//! [`put_resolve`]: EffectContext::put_resolve
//! [`set`]: EffectContext::set
//! [`get_state`]: EffectContext::get_state
//! [`select`]: EffectContext::select
//! [`take`]: EffectContext::take
//! [`delay`]: EffectContext::delay
//! [`spawn`]: EffectContext::spawn

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::core::{scoped_type, Action, CorrelationId, StoreState};
use crate::error::StoreError;
use crate::pending::Settlement;
use crate::reducer::Mutation;
use crate::store::{wait_for_shutdown, Store};

/// Action type that matches every action in [`EffectContext::take`].
pub const TAKE_ANY: &str = "*";

/// Context passed to effect handlers.
///
/// Built fresh for each effect run and cheap to clone. A clone shares the
/// same store, scope and correlation id.
///
/// # Scoping
///
/// Actions emitted through [`put`](Self::put) and
/// [`put_resolve`](Self::put_resolve) are rewritten with the effect's scope
/// when their type is bare. An effect registered at `a/b/load` that puts
/// `"loaded"` dispatches `"a/b/loaded"`; putting `"x/y"` dispatches `"x/y"`.
///
/// [`take`](Self::take) is not scoped: it waits for the fully-qualified type.
pub struct EffectContext<S: StoreState> {
    store: Store<S>,
    scope: Arc<[String]>,
    cid: CorrelationId,
}

impl<S: StoreState> EffectContext<S> {
    pub(crate) fn new(store: Store<S>, scope: Arc<[String]>, cid: CorrelationId) -> Self {
        Self { store, scope, cid }
    }

    /// Dispatch an action without waiting for its result.
    ///
    /// The action goes through the store's gateway like any other dispatch:
    /// it gets its own correlation id, reaches the reducer, and triggers
    /// whatever effect is bound to it.
    pub fn put(&self, action: Action) {
        // Dropping the settlement discards the child's result.
        drop(self.put_resolve(action));
    }

    /// Dispatch an action and get the settlement of the effect it triggers.
    ///
    /// ```ignore
    /// let todos = ctx.put_resolve(Action::new("fetch")).await?;
    /// ```
    pub fn put_resolve(&self, action: Action) -> Settlement {
        self.store.dispatch(action.scoped(&self.scope))
    }

    /// Mutate the state through the built-in set action.
    ///
    /// The mutator runs against a draft, synchronously, before this call
    /// returns. It may mutate the draft in place or return
    /// [`Mutation::Replace`]. The set action is never scoped.
    ///
    /// ```ignore
    /// ctx.set(|draft: &mut Counter| draft.count += 1);
    /// ```
    pub fn set<F, R>(&self, mutator: F)
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Into<Mutation<S>>,
    {
        self.store
            .commit_set(Box::new(move |draft: &mut S| mutator(draft).into()));
    }

    /// Latest committed state.
    pub fn get_state(&self) -> Arc<S> {
        self.store.get_state()
    }

    /// Project the latest committed state.
    pub fn select<T>(&self, selector: impl FnOnce(&S) -> T) -> T {
        self.store.select(selector)
    }

    /// Wait for the next action of `action_type` seen after this call.
    ///
    /// The subscription is taken when `take` is called, not when the returned
    /// future is first polled, so an action put right after calling `take` is
    /// never missed. Pass [`TAKE_ANY`] to match any type.
    ///
    /// `take` listens on the broadcast channel, not on the router's queue.
    /// If more than the configured bus capacity of actions are emitted
    /// before this future gets to run, the oldest are dropped and logged,
    /// and an awaited action among them is never seen. The future then waits
    /// for the next match, or until the store is disposed. Bound the wait
    /// with `tokio::time::timeout` when that matters.
    ///
    /// ```ignore
    /// let confirmation = ctx.take("dialog/confirm");
    /// ctx.put(Action::new("dialog/open"));
    /// let answer = confirmation.await?;
    /// ```
    pub fn take(
        &self,
        action_type: &str,
    ) -> impl Future<Output = Result<Action, StoreError>> + Send + 'static {
        let action_type = action_type.to_string();
        let mut receiver = self.store.subscribe_actions();
        let mut shutdown = self.store.shutdown_signal();

        async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => return Err(StoreError::Disposed),
                    received = receiver.recv() => received,
                };
                match received {
                    Ok(envelope) => {
                        if action_type == TAKE_ANY || envelope.action_type() == action_type {
                            return Ok(envelope.into_parts().1);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, action_type = %action_type, "take lagged behind the action channel");
                    }
                    Err(RecvError::Closed) => return Err(StoreError::Disposed),
                }
            }
        }
    }

    /// Sleep for `duration`.
    pub async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Fork a child task owned by the store.
    ///
    /// The child runs concurrently with the effect and is cancelled when the
    /// store is disposed; its handle then yields `None`.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.store.spawn_scoped(future)
    }

    /// Scope path of the running effect.
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Resolve `action_type` the way [`put`](Self::put) would.
    pub fn qualify(&self, action_type: &str) -> String {
        scoped_type(&self.scope, action_type)
    }

    /// Correlation id of the dispatch this effect will settle.
    pub fn correlation_id(&self) -> CorrelationId {
        self.cid
    }

    /// Handle to the store running this effect.
    ///
    /// The handle, and any clone of it, does not keep the store running:
    /// once every owning handle is dropped the store shuts down and this
    /// effect is cancelled.
    pub fn store(&self) -> &Store<S> {
        &self.store
    }
}

impl<S: StoreState> Clone for EffectContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scope: Arc::clone(&self.scope),
            cid: self.cid,
        }
    }
}

impl<S: StoreState> std::fmt::Debug for EffectContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext")
            .field("scope", &self.scope)
            .field("cid", &self.cid)
            .finish_non_exhaustive()
    }
}

/// Effect handler as a type.
///
/// Closures registered with [`EffectMap::effect`](crate::EffectMap::effect)
/// cover most cases. Implement this trait when the handler carries its own
/// dependencies.
///
/// # Example
///
/// ```ignore
/// struct FetchTodos {
///     api: ApiClient,
/// }
///
/// #[async_trait]
/// impl Effect<AppState> for FetchTodos {
///     type Output = usize;
///
///     async fn run(&self, _action: Action, ctx: EffectContext<AppState>) -> Result<usize> {
///         let todos = self.api.todos().await?;
///         let count = todos.len();
///         ctx.set(move |draft: &mut AppState| draft.todos = todos);
///         Ok(count)
///     }
/// }
///
/// let effects = EffectMap::new().handler("fetch", FetchTodos { api });
/// ```
#[async_trait]
pub trait Effect<S: StoreState>: Send + Sync + 'static {
    /// Value the effect settles its dispatch with. Encoded as JSON.
    type Output: Serialize + Send;

    /// Run the effect for one action.
    ///
    /// # Errors
    ///
    /// An error rejects the dispatch that triggered this run. It does not
    /// stop the store or any other effect.
    async fn run(&self, action: Action, ctx: EffectContext<S>) -> Result<Self::Output>;
}
