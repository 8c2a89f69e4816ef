//! Observed State
//!
//! This module implements the state layer: observed properties, the
//! subscriber registry, and the synced properties that share state between
//! a parent view and its children.
//!
//! # Concepts
//!
//! ## Subscribers
//!
//! Anything that can be notified is a [`PropertySubscriber`] with a unique
//! [`SubscriberId`]. A subscriber declares how it wants to hear about
//! changes when it subscribes: with the new value
//! ([`SinglePropertySubscriber`]) or with the name of the changed property
//! ([`MultiPropertySubscriber`], used by views).
//!
//! ## Properties
//!
//! [`ObservedPropertySimple`] holds a scalar and compares with `PartialEq`.
//! [`ObservedPropertyObject`] holds an `Rc<T>` and compares by identity
//! unless configured otherwise.
//!
//! ## Synced Properties
//!
//! [`SyncedPropertyTwoWay`] (a link) writes local changes back to its source.
//! [`SyncedPropertyOneWay`] (a prop) only copies changes in.
//!
//! # Implementation Notes
//!
//! State is single-threaded. The registry and the render context are
//! thread-local, properties use `RefCell`/`Cell` for interior mutability,
//! and subscriptions hold weak references so a subscriber's lifetime is
//! never extended by the properties it listens to.

mod context;
mod link;
mod object;
mod prop;
mod property;
mod registry;
mod simple;
mod subscriber;

pub use context::RenderContext;
pub use link::SyncedPropertyTwoWay;
pub use object::{identity_equality, value_equality, ObjectEquality, ObservedPropertyObject};
pub use prop::SyncedPropertyOneWay;
pub use property::{ObservedProperty, PropertyCore};
pub use registry::SubscriberManager;
pub use simple::ObservedPropertySimple;
pub use subscriber::{
    MultiPropertySubscriber, PropertySubscriber, SinglePropertySubscriber, SubscriberId, Subscription,
};
