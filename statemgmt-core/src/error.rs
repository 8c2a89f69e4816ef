//! Error types for the state management core.
//!
//! Most failures here are not user-facing. `NotFound` is an ordinary absence
//! that callers handle, the storage errors reject a single operation, and
//! `DuplicateId` / `StaleSubscriberAccess` are invariant violations that go
//! through [`report_violation`] so the configured policy decides whether
//! they abort.

use thiserror::Error;
use tracing::error;

use crate::config::{StateConfig, ViolationPolicy};
use crate::state::SubscriberId;

/// Result alias used throughout the crate.
pub type Result<T, E = StateError> = std::result::Result<T, E>;

/// Errors produced by the registry, properties, views and storage.
#[derive(Debug, Error)]
pub enum StateError {
    /// Registry lookup for an identity that is not registered.
    #[error("subscriber {0} is not registered")]
    NotFound(SubscriberId),

    /// Registry add for an identity that is already present.
    #[error("subscriber {0} is already registered")]
    DuplicateId(SubscriberId),

    /// A notification reached a subscriber that was already torn down.
    #[error("property {property} notified subscriber {subscriber} after it was torn down")]
    StaleSubscriberAccess {
        /// The torn-down subscriber.
        subscriber: SubscriberId,
        /// The property that tried to deliver the notification.
        property: SubscriberId,
    },

    /// Storage operation on a property name that does not exist.
    #[error("no property named '{0}'")]
    UnknownProperty(String),

    /// Typed lookup of a property holding a different value type.
    #[error("property '{name}' does not hold a value of type {expected}")]
    PropertyTypeMismatch {
        /// Property name.
        name: String,
        /// The requested value type.
        expected: &'static str,
    },

    /// Deleting a property that still has subscribers.
    #[error("property '{name}' still has {count} subscribers")]
    PropertyHasSubscribers {
        /// Property name.
        name: String,
        /// Number of remaining subscribers.
        count: usize,
    },

    /// A view provides a name that an ancestor already provides.
    #[error("duplicate provided property '{0}'")]
    DuplicateProvide(String),

    /// A view consumes a name that no ancestor provides.
    #[error("missing provided property '{0}'")]
    MissingProvide(String),

    /// Link or prop creation is not supported by the source property.
    #[error("unsupported: {0}")]
    UnsupportedLink(&'static str),

    /// Persistence backend failure.
    #[error("persistence backend error: {0}")]
    Persistence(String),

    /// Persisted value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Surface an invariant violation according to the thread's [`StateConfig`].
///
/// Always logs at error level; panics afterwards under [`ViolationPolicy::Panic`].
pub(crate) fn report_violation(err: StateError) {
    error!(error = %err, "state invariant violated");
    if StateConfig::current().on_violation == ViolationPolicy::Panic {
        panic!("state invariant violated: {err}");
    }
}
