//! Scoped effect router.
//!
//! The router drains the store's routing queue. The gateway pushes every
//! action with a bound effect onto that queue next to emitting it on the
//! broadcast channel. The queue is unbounded, so a burst of dispatches never
//! makes the router skip an action the way a lagging broadcast receiver
//! would.
//!
//! For every envelope the router looks up the effects bound to the action's
//! type, strips the correlation id, and starts each effect as its own task
//! with a fresh [`EffectContext`]. When an effect finishes, its value (or
//! error, or panic) settles the dispatch with the matching correlation id.
//!
//! Effects never block the loop: a slow effect only delays its own caller.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::core::{Action, ActionEnvelope, CorrelationId, StoreState};
use crate::effect_impl::EffectContext;
use crate::effect_map::EffectDescriptor;
use crate::error::{panic_message, StoreError};
use crate::store::{wait_for_shutdown, Store, StoreInner};

/// Descriptors grouped by the action type they bind to.
///
/// Nearly every type has one effect, so the group is stored inline.
pub(crate) struct RouteTable<S: StoreState> {
    routes: HashMap<String, SmallVec<[EffectDescriptor<S>; 1]>>,
}

impl<S: StoreState> RouteTable<S> {
    /// Index descriptors by type. Several descriptors may share a type; they
    /// keep their flattening order.
    pub(crate) fn new(descriptors: &[EffectDescriptor<S>]) -> Self {
        let mut routes: HashMap<String, SmallVec<[EffectDescriptor<S>; 1]>> = HashMap::new();
        for descriptor in descriptors {
            routes
                .entry(descriptor.action_type().to_string())
                .or_default()
                .push(descriptor.clone());
        }
        Self { routes }
    }

    pub(crate) fn get(&self, action_type: &str) -> Option<&[EffectDescriptor<S>]> {
        self.routes.get(action_type).map(|group| group.as_slice())
    }

    pub(crate) fn is_bound(&self, action_type: &str) -> bool {
        self.routes.contains_key(action_type)
    }

    /// Number of distinct bound types.
    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn descriptor_count(&self) -> usize {
        self.routes.values().map(|group| group.len()).sum()
    }
}

/// Routing loop for one store.
///
/// Holds the store weakly: the loop never keeps a store alive on its own.
pub(crate) struct Router<S: StoreState> {
    store: Weak<StoreInner<S>>,
    routes: Arc<RouteTable<S>>,
    queue: mpsc::UnboundedReceiver<ActionEnvelope>,
    shutdown: watch::Receiver<bool>,
}

impl<S: StoreState> Router<S> {
    pub(crate) fn new(
        store: Weak<StoreInner<S>>,
        routes: Arc<RouteTable<S>>,
        queue: mpsc::UnboundedReceiver<ActionEnvelope>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            routes,
            queue,
            shutdown,
        }
    }

    /// Run until the store is disposed or dropped.
    pub(crate) async fn run(mut self) {
        debug!(
            bound_types = self.routes.len(),
            effects = self.routes.descriptor_count(),
            "effect router starting"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                received = self.queue.recv() => received,
            };

            // The queue closes when the store is dropped.
            let Some(envelope) = received else {
                break;
            };
            self.route(envelope);
        }

        debug!("effect router stopped");
    }

    fn route(&self, envelope: ActionEnvelope) {
        let Some(descriptors) = self.routes.get(envelope.action_type()) else {
            trace!(action_type = %envelope.action_type(), "no effect bound");
            return;
        };
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let store = Store::from_inner(inner);

        let (cid, action) = envelope.into_parts();
        for descriptor in descriptors {
            run_effect(&store, descriptor, cid, action.clone());
        }
    }
}

/// Start one effect run and settle `cid` with its outcome.
fn run_effect<S: StoreState>(
    store: &Store<S>,
    descriptor: &EffectDescriptor<S>,
    cid: CorrelationId,
    action: Action,
) {
    let handler = Arc::clone(descriptor.handler());
    let ctx = EffectContext::new(store.clone(), descriptor.shared_scope(), cid);
    let action_type = descriptor.action_type().to_string();
    let settle_with = store.clone();

    debug!(%cid, action_type = %action_type, "running effect");

    store.spawn_scoped(async move {
        // The handler is called inside the guarded future so a panic while
        // building it is caught too.
        let result = AssertUnwindSafe(async move { handler(action, ctx).await })
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(value)) => {
                trace!(%cid, action_type = %action_type, "effect finished");
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!(%cid, action_type = %action_type, error = %err, "effect failed");
                Err(err)
            }
            Err(panic_info) => {
                let message = panic_message(&panic_info);
                error!(%cid, action_type = %action_type, panic = %message, "effect panicked");
                Err(StoreError::EffectPanicked { message })
            }
        };

        settle_with.pending().settle(cid, outcome);
    });
}
