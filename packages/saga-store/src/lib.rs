//! # Saga Store
//!
//! A component-local state store where reducers mutate drafts, effects run
//! async workflows, and every dispatch is a future that settles with the
//! result of the effect it triggered.
//!
//! ## Core Concepts
//!
//! - [`Action`] = a slash-delimited type path plus a JSON payload
//! - [`ReducerMap`] = synchronous state transitions, one per action type
//! - [`EffectMap`] = async workflows, nested into scopes, one per action type
//!
//! The key principle: **one dispatch, one settlement**. A dispatch resolves
//! with whatever its effect returns, rejects with whatever its effect fails
//! with, and resolves with `null` right away when no effect is bound.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!     │
//!     ▼ dispatch(action) ─► Settlement (future)
//! Store ─────────────────────────────────────────────┐
//!     │                                              │
//!     ├─► PendingTable.register(cid)                 │
//!     │                                              │
//!     ├─► DraftReducer.apply(action)   (sync)        │
//!     │                                              │
//!     └─► route queue + ActionBus.emit(cid, action)  │
//!               │                                    │
//!               ▼                                    │
//!         Router.run() loop                          │
//!               │                                    │
//!               └─► effect(action, ctx)  (task)      │
//!                        │                           │
//!                        ├─► ctx.put() ──────────────┘
//!                        ├─► ctx.set() ─► DraftReducer
//!                        │
//!                        ▼
//!               PendingTable.settle(cid) ─► Settlement ready
//! ```
//!
//! ## Key Invariants
//!
//! 1. **State first** - a dispatch's state transition is committed before
//!    any effect sees the action
//! 2. **Per-store correlation** - ids come from the store's own counter
//! 3. **First settlement wins** - a pending entry is removed when settled
//! 4. **Errors stay local** - a failing or panicking effect rejects its own
//!    dispatch and nothing else
//! 5. **Scoped puts** - bare types put from an effect are prefixed with the
//!    effect's scope
//!
//! ## Guarantees
//!
//! - **Every bound action is routed**: effects are fed from an unbounded
//!   queue, so dispatch bursts never drop an effect run
//! - **At-most-once observation**: `take` and `subscribe_actions` read a
//!   bounded broadcast channel; slow observers may miss actions
//! - **Owned lifetime**: dropping the last handle returned by `build` shuts
//!   the store down and cancels its effects
//! - **In-memory only**: state is not persisted
//! - **Unbounded by default**: `dispatch` waits as long as its effect runs;
//!   use `dispatch_timeout` for a bound
//!
//! ## Example
//!
//! ```ignore
//! use saga_store::{Action, EffectContext, EffectMap, Model, ReducerMap};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Todos {
//!     items: Vec<String>,
//!     loading: bool,
//! }
//!
//! let model = Model::new(Todos::default())
//!     .reducer(ReducerMap::new().on("todos/fetch", |draft: &mut Todos, _: &Action| {
//!         draft.loading = true;
//!     }))
//!     .effects(EffectMap::new().scope(
//!         "todos",
//!         EffectMap::new()
//!             .effect("fetch", |_action, ctx: EffectContext<Todos>| async move {
//!                 let items = api::fetch_todos().await?;
//!                 let count = items.len();
//!                 ctx.set(move |draft: &mut Todos| {
//!                     draft.items = items;
//!                     draft.loading = false;
//!                 });
//!                 ctx.put(Action::new("loaded")); // dispatched as "todos/loaded"
//!                 Ok(count)
//!             }),
//!     ));
//!
//! let store = model.build();
//! let count = store.dispatch(Action::new("todos/fetch")).await?;
//! ```
//!
//! ## What This Is Not
//!
//! Saga Store is **not**:
//! - A global application store
//! - A persistence layer
//! - A scheduler (effects are plain tokio tasks)

// Core modules
mod bus;
mod config;
mod core;
mod effect_impl;
mod effect_map;
mod error;
mod pending;
mod provider;
mod reducer;
mod router;
mod store;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core types
pub use crate::core::{
    qualified_type, scoped_type, Action, ActionEnvelope, CorrelationId, StoreState,
    PATH_SEPARATOR, SET_ACTION_TYPE,
};

// Re-export error types
pub use crate::error::StoreError;

// Re-export effect types
pub use effect_impl::{Effect, EffectContext, TAKE_ANY};
pub use effect_map::{EffectDescriptor, EffectFn, EffectFuture, EffectMap, EffectNode};

// Re-export reducer types
pub use reducer::{Mutation, Mutator, ReducerFn, ReducerMap, ReducerMode};

// Re-export bus and settlement types
pub use bus::ActionBus;
pub use pending::{PendingTable, Settlement};

// Re-export store types (primary entry point)
pub use store::{Model, Store};

// Re-export provider types
pub use provider::{Connected, Dispatcher, StoreContext};

// Re-export configuration
pub use config::{StoreConfig, DEFAULT_DISPATCH_TIMEOUT};

// Re-export commonly used external types
pub use async_trait::async_trait;
