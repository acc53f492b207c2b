//! Context providers: one store per provided scope.
//!
//! A [`StoreContext`] is created once per model, typically as a static or a
//! long-lived value owned by the UI layer. [`StoreContext::provide`] builds a
//! fresh store, makes it visible to everything the given future runs, and
//! disposes it when the future completes or is dropped:
//!
//! ```ignore
//! let todos = StoreContext::new(todo_model());
//!
//! todos.provide(async {
//!     let dispatch = todos.use_dispatch()?;
//!     dispatch.dispatch(Action::new("todos/fetch")).await?;
//!
//!     let count = todos.use_state_with(|state| state.items.len())?;
//!     println!("{count} todos");
//!     Ok::<_, StoreError>(())
//! })
//! .await?;
//! ```
//!
//! Provided stores are task-local. A task spawned from inside `provide` does
//! not see them; pass the [`Store`] handle along instead.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::core::{Action, StoreState};
use crate::error::StoreError;
use crate::pending::Settlement;
use crate::store::{Model, Store};

type Providers = HashMap<u64, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    static PROVIDED: Providers;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Creates and exposes stores for one model.
pub struct StoreContext<S: StoreState> {
    id: u64,
    model: Model<S>,
}

impl<S: StoreState> StoreContext<S> {
    /// Create a context for `model`.
    pub fn new(model: Model<S>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            model,
        }
    }

    /// The model each provided store is built from.
    pub fn model(&self) -> &Model<S> {
        &self.model
    }

    /// Run `future` with a fresh store provided for this context.
    ///
    /// Nested calls shadow the outer store for their own duration. Stores of
    /// other contexts stay visible.
    pub async fn provide<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        let store = self.model.build();
        let _guard = DisposeOnDrop(store.clone());

        let mut providers = PROVIDED.try_with(Clone::clone).unwrap_or_default();
        providers.insert(self.id, Arc::new(store));

        debug!(context = self.id, "store provided");
        PROVIDED.scope(providers, future).await
    }

    /// The innermost store provided for this context.
    ///
    /// Fails with [`StoreError::OutsideContext`] outside of
    /// [`provide`](Self::provide).
    pub fn use_store(&self) -> Result<Store<S>, StoreError> {
        PROVIDED
            .try_with(|providers| {
                providers
                    .get(&self.id)
                    .and_then(|store| store.downcast_ref::<Store<S>>())
                    .cloned()
            })
            .ok()
            .flatten()
            .ok_or(StoreError::OutsideContext)
    }

    /// Latest committed state of the provided store.
    pub fn use_state(&self) -> Result<Arc<S>, StoreError> {
        Ok(self.use_store()?.get_state())
    }

    /// Project the state of the provided store.
    pub fn use_state_with<T>(&self, selector: impl FnOnce(&S) -> T) -> Result<T, StoreError> {
        Ok(self.use_store()?.select(selector))
    }

    /// Dispatch handle for the provided store.
    pub fn use_dispatch(&self) -> Result<Dispatcher<S>, StoreError> {
        Ok(Dispatcher {
            store: self.use_store()?,
        })
    }

    /// Wrap `component` so every call runs inside its own provided store.
    pub fn connect<F>(&self, component: F) -> Connected<S, F> {
        Connected {
            context: self.clone(),
            component,
        }
    }
}

impl<S: StoreState> Clone for StoreContext<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            model: self.model.clone(),
        }
    }
}

impl<S: StoreState> std::fmt::Debug for StoreContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("id", &self.id)
            .field("model", &self.model)
            .finish()
    }
}

struct DisposeOnDrop<S: StoreState>(Store<S>);

impl<S: StoreState> Drop for DisposeOnDrop<S> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// The dispatch half of a provided store.
pub struct Dispatcher<S: StoreState> {
    store: Store<S>,
}

impl<S: StoreState> Dispatcher<S> {
    /// Dispatch an action on the provided store.
    pub fn dispatch(&self, action: Action) -> Settlement {
        self.store.dispatch(action)
    }
}

impl<S: StoreState> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: StoreState> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// A component bound to a [`StoreContext`]. See [`StoreContext::connect`].
pub struct Connected<S: StoreState, F> {
    context: StoreContext<S>,
    component: F,
}

impl<S: StoreState, F> Connected<S, F> {
    /// Run the component with `props` inside a freshly provided store.
    pub async fn render<P, Fut>(&self, props: P) -> Fut::Output
    where
        F: Fn(P) -> Fut,
        Fut: Future,
    {
        self.context.provide((self.component)(props)).await
    }

    /// The context stores are provided from.
    pub fn context(&self) -> &StoreContext<S> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect_impl::EffectContext;
    use crate::effect_map::EffectMap;
    use crate::reducer::ReducerMap;
    use serde_json::json;

    #[derive(Debug, Clone, Default)]
    struct Todos {
        items: Vec<String>,
    }

    fn todo_model() -> Model<Todos> {
        Model::new(Todos::default())
            .reducer(ReducerMap::new().on("todos/add", |draft: &mut Todos, action: &Action| {
                if let Some(title) = action.get("title").and_then(|v| v.as_str()) {
                    draft.items.push(title.to_string());
                }
            }))
            .effects(EffectMap::new().scope(
                "todos",
                EffectMap::new().effect("count", |_action, ctx: EffectContext<Todos>| async move {
                    Ok(ctx.select(|state| state.items.len()))
                }),
            ))
    }

    #[test]
    fn test_outside_provider_fails() {
        let context = StoreContext::new(todo_model());

        assert!(matches!(context.use_store(), Err(StoreError::OutsideContext)));
        assert!(matches!(context.use_state(), Err(StoreError::OutsideContext)));
        assert!(matches!(
            context.use_dispatch(),
            Err(StoreError::OutsideContext)
        ));
    }

    #[tokio::test]
    async fn test_provide_exposes_store() {
        let context = StoreContext::new(todo_model());

        let count = context
            .provide(async {
                let dispatch = context.use_dispatch().unwrap();
                dispatch
                    .dispatch(Action::new("todos/add").with("title", "milk"))
                    .await
                    .unwrap();
                let count = dispatch.dispatch(Action::new("todos/count")).await.unwrap();

                assert_eq!(context.use_state().unwrap().items, vec!["milk".to_string()]);
                count
            })
            .await;

        assert_eq!(count, json!(1));
    }

    #[tokio::test]
    async fn test_store_is_disposed_after_provide() {
        let context = StoreContext::new(todo_model());

        let store = context
            .provide(async { context.use_store().unwrap() })
            .await;

        assert!(store.is_disposed());
        assert!(matches!(context.use_store(), Err(StoreError::OutsideContext)));
    }

    #[tokio::test]
    async fn test_nested_provide_shadows_outer_store() {
        let context = StoreContext::new(todo_model());

        context
            .provide(async {
                let outer = context.use_dispatch().unwrap();
                outer
                    .dispatch(Action::new("todos/add").with("title", "outer"))
                    .await
                    .unwrap();

                context
                    .provide(async {
                        assert!(context.use_state().unwrap().items.is_empty());
                    })
                    .await;

                assert_eq!(context.use_state_with(|s| s.items.len()).unwrap(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_contexts_are_independent() {
        let todos = StoreContext::new(todo_model());
        let counters = StoreContext::new(Model::new(0u32));

        todos
            .provide(async {
                assert!(counters.use_store().is_err());
                counters
                    .provide(async {
                        assert!(todos.use_store().is_ok());
                        assert_eq!(*counters.use_state().unwrap(), 0);
                    })
                    .await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_connect_builds_store_per_render() {
        let context = StoreContext::new(todo_model());
        let inner = context.clone();
        let component = context.connect(move |title: &'static str| {
            let context = inner.clone();
            async move {
                let dispatch = context.use_dispatch()?;
                dispatch
                    .dispatch(Action::new("todos/add").with("title", title))
                    .await?;
                context.use_state_with(|s| s.items.clone())
            }
        });

        let first = component.render("a").await.unwrap();
        let second = component.render("b").await.unwrap();

        assert_eq!(first, vec!["a".to_string()]);
        assert_eq!(second, vec!["b".to_string()]);
    }
}
