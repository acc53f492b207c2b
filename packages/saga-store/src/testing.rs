//! Testing utilities for stores and effect workflows.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! saga-store = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Waiting for actions
//!
//! Effects run on their own tasks, so a test that dispatches an action and
//! then asserts on what the effect `put` has to wait. [`ActionRecorder`]
//! records everything seen on a store's action channel and lets the test
//! wait for a number of actions instead of sleeping:
//!
//! ```ignore
//! let recorder = ActionRecorder::attach(&store);
//!
//! store.dispatch(Action::new("todos/sync"));
//!
//! let actions = recorder.wait_for_count(3, Duration::from_secs(1)).await?;
//! assert_eq!(actions[2].action_type, "todos/synced");
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::core::{Action, StoreState, SET_ACTION_TYPE};
use crate::error::StoreError;
use crate::store::Store;

/// Records the actions emitted on a store's channel.
///
/// Recording starts when the recorder is attached and stops when it is
/// dropped or the store goes away.
pub struct ActionRecorder {
    seen: Arc<Mutex<Vec<Action>>>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ActionRecorder {
    /// Start recording everything `store` emits from now on.
    pub fn attach<S: StoreState>(store: &Store<S>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let mut receiver = store.subscribe_actions();

        let task = tokio::spawn({
            let seen = Arc::clone(&seen);
            let notify = Arc::clone(&notify);
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(envelope) => {
                            seen.lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(envelope.into_parts().1);
                            notify.notify_waiters();
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        Self { seen, notify, task }
    }

    /// Every action recorded so far, in emission order.
    pub fn actions(&self) -> Vec<Action> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Types of the recorded actions, in emission order.
    pub fn types(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|action| action.action_type.clone())
            .collect()
    }

    /// Types of the recorded actions, leaving out the built-in set action.
    pub fn dispatched_types(&self) -> Vec<String> {
        self.types()
            .into_iter()
            .filter(|action_type| action_type != SET_ACTION_TYPE)
            .collect()
    }

    /// Number of recorded actions.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` actions were recorded.
    ///
    /// Fails with [`StoreError::Timeout`] if that takes longer than `timeout`.
    pub async fn wait_for_count(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Action>, StoreError> {
        let wait = async {
            loop {
                // Register for notification BEFORE checking the count
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.len() >= count {
                    return self.actions();
                }

                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| StoreError::Timeout { duration: timeout })
    }
}

impl Drop for ActionRecorder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ActionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRecorder")
            .field("recorded", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect_impl::EffectContext;
    use crate::effect_map::EffectMap;
    use crate::store::Model;

    fn chain_model() -> Model<u32> {
        Model::new(0u32).effects(EffectMap::new().scope(
            "chain",
            EffectMap::new()
                .effect("start", |_action, ctx: EffectContext<u32>| async move {
                    ctx.put(Action::new("middle"));
                    Ok(())
                })
                .effect("middle", |_action, ctx: EffectContext<u32>| async move {
                    ctx.set(|draft: &mut u32| *draft += 1);
                    ctx.put(Action::new("end"));
                    Ok(())
                }),
        ))
    }

    #[tokio::test]
    async fn test_recorder_sees_chain() {
        let store = chain_model().build();
        let recorder = ActionRecorder::attach(&store);

        store.dispatch(Action::new("chain/start")).await.unwrap();

        let actions = recorder
            .wait_for_count(4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(
            recorder.dispatched_types(),
            vec!["chain/start", "chain/middle", "chain/end"]
        );
        assert!(recorder.types().contains(&SET_ACTION_TYPE.to_string()));
    }

    #[tokio::test]
    async fn test_wait_for_count_times_out() {
        let store = chain_model().build();
        let recorder = ActionRecorder::attach(&store);

        let err = recorder
            .wait_for_count(1, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_recorder_misses_earlier_actions() {
        let store = chain_model().build();
        let _ = store.dispatch(Action::new("before"));

        let recorder = ActionRecorder::attach(&store);
        let _ = store.dispatch(Action::new("after"));

        let actions = recorder
            .wait_for_count(1, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(actions[0].action_type, "after");
    }
}
