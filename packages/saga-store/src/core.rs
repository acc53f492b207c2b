//! Core types for the saga-store dispatch pipeline.
//!
//! # Overview
//!
//! Everything that flows through a store is an [`Action`]: a slash-delimited
//! type path plus an open JSON payload. Inside the store every dispatch is
//! tagged with a [`CorrelationId`] so the effect that handles it can settle
//! the caller's [`Settlement`](crate::Settlement).
//!
//! # Type paths
//!
//! Action types are paths such as `"todos/fetch"`. Effects registered under a
//! nested scope bind to the full path, and an effect that emits a bare type
//! (no `/`) has it rewritten to its own scope. See [`scoped_type`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Separator between the segments of an action type path.
pub const PATH_SEPARATOR: char = '/';

/// Reserved action type used by the built-in `set` mutation.
pub const SET_ACTION_TYPE: &str = "@@SET_SYMBOL";

/// An action: a type path plus an arbitrary payload.
///
/// Serializes flat, the same shape a UI layer would send:
///
/// ```ignore
/// let action = Action::new("todos/add").with("title", "buy milk");
/// assert_eq!(
///     serde_json::to_value(&action)?,
///     json!({ "type": "todos/add", "title": "buy milk" }),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Slash-delimited type path. Must be non-empty when dispatched.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Payload fields carried next to `type`.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Create an action with an empty payload.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Map::new(),
        }
    }

    /// Create an action whose payload is the serialized form of `payload`.
    ///
    /// `payload` must serialize to a JSON object (a struct or a map); its
    /// fields become the action's payload fields.
    pub fn from_payload<T: Serialize>(
        action_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, StoreError> {
        match serde_json::to_value(payload)? {
            Value::Object(payload) => Ok(Self {
                action_type: action_type.into(),
                payload,
            }),
            Value::Null => Ok(Self::new(action_type)),
            other => Err(StoreError::InvalidPayload(serde::de::Error::custom(
                format!("action payload must be an object, got {}", kind_of(&other)),
            ))),
        }
    }

    /// Add a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Read a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Deserialize the payload fields into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    /// Returns true if the type already carries a path separator.
    pub fn is_qualified(&self) -> bool {
        self.action_type.contains(PATH_SEPARATOR)
    }

    /// Rewrite the type to `scope`, unless it is already qualified.
    pub fn scoped(mut self, scope: &[String]) -> Self {
        self.action_type = scoped_type(scope, &self.action_type);
        self
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Join a scope and a key into a fully-qualified type path.
pub fn qualified_type(scope: &[String], key: &str) -> String {
    let mut path = String::with_capacity(
        scope.iter().map(|s| s.len() + 1).sum::<usize>() + key.len(),
    );
    for segment in scope {
        path.push_str(segment);
        path.push(PATH_SEPARATOR);
    }
    path.push_str(key);
    path
}

/// Resolve an action type emitted from inside a scope.
///
/// Types that already contain a `/` are used verbatim; bare types are
/// prefixed with the scope path.
pub fn scoped_type(scope: &[String], action_type: &str) -> String {
    if action_type.contains(PATH_SEPARATOR) {
        action_type.to_string()
    } else {
        qualified_type(scope, action_type)
    }
}

/// State held by a store.
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Clone + Send + Sync + 'static`. You don't need to implement it manually.
///
/// `Clone` is what makes drafts possible: a reducer mutates a copy whenever
/// the current snapshot is still shared with a reader.
pub trait StoreState: Clone + Send + Sync + 'static {}

// Blanket implementation for any type that meets the requirements
impl<T: Clone + Send + Sync + 'static> StoreState for T {}

/// Correlation ID linking a dispatch to the effect run that settles it.
///
/// IDs come from a per-store counter that starts at 1 and only grows, so they
/// are unique among a store's in-flight dispatches. They carry no meaning
/// beyond identity and are displayed as their decimal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw id.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An action tagged with its correlation metadata.
///
/// This is the transport format on the action channel. Handlers never see it:
/// the router unwraps the envelope and hands them the bare [`Action`].
#[derive(Debug, Clone)]
pub struct ActionEnvelope {
    /// Correlation ID of the dispatch that produced this action.
    pub cid: CorrelationId,
    /// The action itself.
    pub action: Action,
}

impl ActionEnvelope {
    /// Create a new envelope.
    pub fn new(cid: CorrelationId, action: Action) -> Self {
        Self { cid, action }
    }

    /// Type path of the wrapped action.
    pub fn action_type(&self) -> &str {
        &self.action.action_type
    }

    /// Strip the correlation metadata.
    pub fn into_parts(self) -> (CorrelationId, Action) {
        (self.cid, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_action_serializes_flat() {
        let action = Action::new("todos/add").with("title", "buy milk").with("done", false);

        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({ "type": "todos/add", "title": "buy milk", "done": false })
        );

        let back: Action = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_from_payload_struct() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Add {
            title: String,
        }

        let action = Action::from_payload("add", &Add { title: "x".into() }).unwrap();
        assert_eq!(action.get("title"), Some(&json!("x")));

        let add: Add = action.payload_as().unwrap();
        assert_eq!(add, Add { title: "x".into() });
    }

    #[test]
    fn test_from_payload_rejects_non_object() {
        let err = Action::from_payload("add", &42).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload(_)));
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn test_from_payload_unit_is_empty() {
        let action = Action::from_payload("ping", &()).unwrap();
        assert!(action.payload.is_empty());
    }

    #[test]
    fn test_scoped_type_prefixes_bare_types() {
        assert_eq!(scoped_type(&scope(&["a", "b"]), "child"), "a/b/child");
    }

    #[test]
    fn test_scoped_type_keeps_qualified_types() {
        assert_eq!(scoped_type(&scope(&["a", "b"]), "x/y"), "x/y");
    }

    #[test]
    fn test_scoped_type_at_root() {
        assert_eq!(scoped_type(&[], "increment"), "increment");
    }

    #[test]
    fn test_action_scoped() {
        let action = Action::new("loaded").scoped(&scope(&["todos"]));
        assert_eq!(action.action_type, "todos/loaded");
        assert!(action.is_qualified());
    }

    #[test]
    fn test_qualified_type_joins_segments() {
        assert_eq!(qualified_type(&scope(&["a", "b"]), "c"), "a/b/c");
        assert_eq!(qualified_type(&[], "c"), "c");
    }

    #[test]
    fn test_correlation_id_display() {
        let cid = CorrelationId::from_raw(17);
        assert_eq!(cid.to_string(), "17");
        assert_eq!(cid.into_inner(), 17);
        assert!(CorrelationId::from(3) < CorrelationId::from(4));
    }

    #[test]
    fn test_envelope_into_parts() {
        let envelope = ActionEnvelope::new(CorrelationId::from(9), Action::new("a/b"));
        assert_eq!(envelope.action_type(), "a/b");

        let (cid, action) = envelope.into_parts();
        assert_eq!(cid, CorrelationId::from(9));
        assert_eq!(action, Action::new("a/b"));
    }
}
