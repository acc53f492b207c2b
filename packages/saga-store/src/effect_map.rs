//! Nested effect maps and the flattening that turns them into routes.
//!
//! Effects are registered in a tree. Leaves are handlers; inner nodes are
//! scopes that namespace everything below them:
//!
//! ```ignore
//! let effects = EffectMap::new()
//!     .effect("increment", |_action, ctx: EffectContext<Counter>| async move {
//!         ctx.set(|draft| draft.count += 1);
//!         Ok("done")
//!     })
//!     .scope("todos", EffectMap::new()
//!         .effect("fetch", fetch_todos)      // binds "todos/fetch"
//!         .handler("save", SaveTodoEffect)); // binds "todos/save"
//! ```
//!
//! [`EffectMap::flatten`] walks the tree depth-first in insertion order and
//! yields one [`EffectDescriptor`] per handler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::core::{qualified_type, Action, StoreState};
use crate::effect_impl::{Effect, EffectContext};
use crate::error::StoreError;

/// Future returned by a type-erased effect handler.
pub type EffectFuture = BoxFuture<'static, Result<Value, StoreError>>;

/// A type-erased effect handler.
pub type EffectFn<S> = Arc<dyn Fn(Action, EffectContext<S>) -> EffectFuture + Send + Sync>;

/// One node of an effect map.
pub enum EffectNode<S: StoreState> {
    /// A terminal handler.
    Handler(EffectFn<S>),
    /// A nested namespace of effects.
    Scope(EffectMap<S>),
}

impl<S: StoreState> Clone for EffectNode<S> {
    fn clone(&self) -> Self {
        match self {
            EffectNode::Handler(handler) => EffectNode::Handler(Arc::clone(handler)),
            EffectNode::Scope(map) => EffectNode::Scope(map.clone()),
        }
    }
}

/// Ordered tree of effect handlers.
///
/// Keys keep their insertion order. Registering an existing key again
/// replaces its node in place.
pub struct EffectMap<S: StoreState> {
    entries: Vec<(String, EffectNode<S>)>,
}

impl<S: StoreState> EffectMap<S> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a closure handler under `key`.
    ///
    /// The handler's return value is encoded as JSON and becomes the result
    /// of the dispatch that triggered it.
    pub fn effect<F, Fut, T>(self, key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Action, EffectContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send,
    {
        let handler: EffectFn<S> = Arc::new(move |action: Action, ctx: EffectContext<S>| {
            let run = handler(action, ctx);
            Box::pin(async move { encode_result(run.await) }) as EffectFuture
        });
        self.insert(key.into(), EffectNode::Handler(handler))
    }

    /// Register an [`Effect`] implementation under `key`.
    pub fn handler<E>(self, key: impl Into<String>, effect: E) -> Self
    where
        E: Effect<S>,
    {
        let effect = Arc::new(effect);
        let handler: EffectFn<S> = Arc::new(move |action: Action, ctx: EffectContext<S>| {
            let effect = Arc::clone(&effect);
            Box::pin(async move { encode_result(effect.run(action, ctx).await) }) as EffectFuture
        });
        self.insert(key.into(), EffectNode::Handler(handler))
    }

    /// Nest `child` under `key`.
    pub fn scope(self, key: impl Into<String>, child: EffectMap<S>) -> Self {
        self.insert(key.into(), EffectNode::Scope(child))
    }

    fn insert(mut self, key: String, node: EffectNode<S>) -> Self {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = node,
            None => self.entries.push((key, node)),
        }
        self
    }

    /// Direct children, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &EffectNode<S>)> {
        self.entries.iter().map(|(key, node)| (key.as_str(), node))
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map has no children.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten the tree into routable descriptors.
    ///
    /// Depth-first, insertion order at each level. Every handler appears
    /// exactly once; its scope is the path of scope keys above it.
    pub fn flatten(&self) -> Vec<EffectDescriptor<S>> {
        let mut descriptors = Vec::new();
        flatten_into(self, &[], &mut descriptors);
        descriptors
    }
}

fn flatten_into<S: StoreState>(
    map: &EffectMap<S>,
    scope: &[String],
    out: &mut Vec<EffectDescriptor<S>>,
) {
    let shared: Arc<[String]> = scope.into();
    for (key, node) in &map.entries {
        match node {
            EffectNode::Handler(handler) => out.push(EffectDescriptor::new(
                Arc::clone(&shared),
                key.clone(),
                Arc::clone(handler),
            )),
            EffectNode::Scope(child) => {
                let mut nested = scope.to_vec();
                nested.push(key.clone());
                flatten_into(child, &nested, out);
            }
        }
    }
}

fn encode_result<T: Serialize>(result: anyhow::Result<T>) -> Result<Value, StoreError> {
    let value = result.map_err(StoreError::Effect)?;
    serde_json::to_value(value).map_err(StoreError::ResultEncoding)
}

impl<S: StoreState> Default for EffectMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StoreState> Clone for EffectMap<S> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<S: StoreState> fmt::Debug for EffectMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, node) in &self.entries {
            match node {
                EffectNode::Handler(_) => map.entry(key, &"<effect>"),
                EffectNode::Scope(child) => map.entry(key, child),
            };
        }
        map.finish()
    }
}

/// A routable effect: where it sits in the tree and what it runs.
///
/// Immutable once built.
pub struct EffectDescriptor<S: StoreState> {
    scope: Arc<[String]>,
    key: String,
    action_type: String,
    handler: EffectFn<S>,
}

impl<S: StoreState> EffectDescriptor<S> {
    fn new(scope: Arc<[String]>, key: String, handler: EffectFn<S>) -> Self {
        let action_type = qualified_type(&scope, &key);
        Self {
            scope,
            key,
            action_type,
            handler,
        }
    }

    /// Scope path above the handler.
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// The handler's own key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fully-qualified action type this effect binds to.
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub(crate) fn shared_scope(&self) -> Arc<[String]> {
        Arc::clone(&self.scope)
    }

    pub(crate) fn handler(&self) -> &EffectFn<S> {
        &self.handler
    }
}

impl<S: StoreState> Clone for EffectDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            key: self.key.clone(),
            action_type: self.action_type.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S: StoreState> fmt::Debug for EffectDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("scope", &self.scope)
            .field("key", &self.key)
            .field("action_type", &self.action_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type State = u32;

    fn noop() -> EffectMap<State> {
        EffectMap::new()
    }

    fn leaf(map: EffectMap<State>, key: &str) -> EffectMap<State> {
        map.effect(key, |_action, _ctx: EffectContext<State>| async move { Ok(()) })
    }

    fn paths(descriptors: &[EffectDescriptor<State>]) -> Vec<(Vec<String>, String)> {
        descriptors
            .iter()
            .map(|d| (d.scope().to_vec(), d.key().to_string()))
            .collect()
    }

    #[test]
    fn test_flat_map() {
        let map = leaf(leaf(noop(), "increment"), "decrement");

        let descriptors = map.flatten();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].action_type(), "increment");
        assert!(descriptors[0].scope().is_empty());
        assert_eq!(descriptors[1].action_type(), "decrement");
    }

    #[test]
    fn test_nested_scopes_accumulate() {
        let map = noop().scope("a", leaf(noop(), "x").scope("b", leaf(noop(), "child")));

        let descriptors = map.flatten();

        assert_eq!(
            paths(&descriptors),
            vec![
                (vec!["a".to_string()], "x".to_string()),
                (vec!["a".to_string(), "b".to_string()], "child".to_string()),
            ]
        );
        assert_eq!(descriptors[1].action_type(), "a/b/child");
    }

    #[test]
    fn test_depth_first_insertion_order() {
        let map = leaf(noop(), "first")
            .scope("outer", leaf(noop(), "inner").scope("deep", leaf(noop(), "leaf")))
            .effect("last", |_action, _ctx: EffectContext<State>| async move { Ok(1) });

        let types: Vec<_> = map
            .flatten()
            .iter()
            .map(|d| d.action_type().to_string())
            .collect();

        assert_eq!(types, vec!["first", "outer/inner", "outer/deep/leaf", "last"]);
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let map = leaf(noop(), "a").scope("s", leaf(leaf(noop(), "b"), "c"));

        assert_eq!(paths(&map.flatten()), paths(&map.flatten()));
        assert_eq!(paths(&map.flatten()), paths(&map.clone().flatten()));
    }

    #[test]
    fn test_empty_scope_yields_nothing() {
        let map = noop().scope("empty", noop());

        assert!(map.flatten().is_empty());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_reregistering_key_replaces_in_place() {
        let map = leaf(leaf(noop(), "a"), "b").scope("a", leaf(noop(), "nested"));

        let types: Vec<_> = map
            .flatten()
            .iter()
            .map(|d| d.action_type().to_string())
            .collect();

        assert_eq!(types, vec!["a/nested", "b"]);
    }

    #[test]
    fn test_entries_and_debug() {
        let map = leaf(noop(), "go").scope("todos", leaf(noop(), "fetch"));

        let keys: Vec<_> = map.entries().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["go", "todos"]);

        let debug_str = format!("{:?}", map);
        assert!(debug_str.contains("todos"));
        assert!(debug_str.contains("fetch"));
    }

    #[test]
    fn test_encode_result() {
        assert_eq!(encode_result(Ok("done")).unwrap(), Value::from("done"));
        assert_eq!(encode_result(Ok(())).unwrap(), Value::Null);

        let err = encode_result::<()>(Err(anyhow::anyhow!("broken"))).unwrap_err();
        assert!(matches!(err, StoreError::Effect(_)));
    }
}
