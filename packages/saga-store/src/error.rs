//! Structured error type for saga-store.
//!
//! `StoreError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. Effects themselves use `anyhow` (ergonomic inside
//! handlers); the store wraps whatever they return in [`StoreError::Effect`]
//! so the caller can still downcast to the original error.
//!
//! # The Error Boundary Rule
//!
//! > **No effect error ever escapes the router.**
//!
//! A failing or panicking effect rejects the settlement of the dispatch that
//! started it and nothing else. The routing loop keeps running.
//!
//! # Example
//!
//! ```ignore
//! match store.dispatch(Action::new("user/save")).await {
//!     Ok(value) => println!("saved: {value}"),
//!     Err(StoreError::Effect(e)) => {
//!         if let Some(db) = e.downcast_ref::<DbError>() {
//!             eprintln!("database refused: {db}");
//!         }
//!     }
//!     Err(StoreError::Disposed) => eprintln!("store went away"),
//!     Err(other) => eprintln!("{other}"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The effect handling the dispatch returned an error.
    ///
    /// Displays as the underlying error, unchanged.
    #[error(transparent)]
    Effect(anyhow::Error),

    /// The effect handling the dispatch panicked.
    #[error("effect panicked: {message}")]
    EffectPanicked {
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The effect's return value could not be encoded as JSON.
    #[error("failed to encode effect result: {0}")]
    ResultEncoding(#[source] serde_json::Error),

    /// A bounded dispatch did not settle in time.
    #[error("dispatch timed out after {duration:?}")]
    Timeout {
        /// How long we waited.
        duration: Duration,
    },

    /// The store was disposed before the dispatch settled, or the dispatch
    /// was issued after disposal.
    #[error("store disposed before the dispatch settled")]
    Disposed,

    /// The dispatched action had an empty type.
    #[error("action type must be a non-empty string")]
    EmptyActionType,

    /// State or dispatch was requested outside a providing scope.
    #[error("not in correct context: no store provided for this scope")]
    OutsideContext,

    /// An action payload could not be converted.
    #[error("invalid action payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error came from the effect itself (error or panic).
    pub fn is_effect_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Effect(_) | StoreError::EffectPanicked { .. }
        )
    }

    /// Get the effect's own error, if that is what this is.
    pub fn effect_error(&self) -> Option<&anyhow::Error> {
        match self {
            StoreError::Effect(e) => Some(e),
            _ => None,
        }
    }

    /// Consume the error and return the effect's own error, if any.
    pub fn into_effect_error(self) -> Option<anyhow::Error> {
        match self {
            StoreError::Effect(e) => Some(e),
            _ => None,
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("quota exceeded for {0}")]
    struct QuotaError(String);

    #[test]
    fn test_effect_error_is_transparent() {
        let err = StoreError::Effect(anyhow::anyhow!("network unreachable"));
        assert_eq!(err.to_string(), "network unreachable");
        assert!(err.is_effect_failure());
    }

    #[test]
    fn test_effect_error_can_be_downcast() {
        let err = StoreError::Effect(QuotaError("alice".into()).into());

        let quota = err
            .effect_error()
            .and_then(|e| e.downcast_ref::<QuotaError>())
            .unwrap();
        assert_eq!(quota.0, "alice");

        let owned = err.into_effect_error().unwrap();
        assert!(owned.to_string().contains("alice"));
    }

    #[test]
    fn test_timeout_display() {
        let err = StoreError::Timeout {
            duration: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("30"));
        assert!(!err.is_effect_failure());
    }

    #[test]
    fn test_outside_context_display() {
        assert!(StoreError::OutsideContext
            .to_string()
            .contains("not in correct context"));
    }

    #[test]
    fn test_error_is_pattern_matchable() {
        let err = StoreError::EffectPanicked {
            message: "boom".into(),
        };

        match &err {
            StoreError::EffectPanicked { message } => assert_eq!(message, "boom"),
            _ => panic!("Expected EffectPanicked"),
        }
        assert!(err.effect_error().is_none());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&payload), "static str");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&payload), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&payload), "unknown panic");
    }
}
