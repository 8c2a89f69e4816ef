//! Subscriber identities and capabilities.
//!
//! A subscriber is anything that takes part in the observation graph: a
//! view, a synced property wrapper, a storage helper. Every subscriber has a
//! process-unique [`SubscriberId`] and can be told that it is about to be
//! deleted. On top of that it declares how it wants to hear about changes:
//!
//! - [`SinglePropertySubscriber`] receives the new value (`has_changed`).
//! - [`MultiPropertySubscriber`] receives the name of the changed property
//!   (`property_has_changed`) and, optionally, read notifications.
//!
//! The capability is chosen once, when a [`Subscription`] is built, and
//! cached in the property's subscriber list.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::registry::SubscriberManager;

/// Unique identifier for a subscriber.
///
/// Assigned from a monotonic counter at creation and never reused while the
/// process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for SubscriberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base capability of every participant in the observation graph.
pub trait PropertySubscriber {
    /// The subscriber's identity.
    fn id(&self) -> SubscriberId;

    /// Called before teardown. The subscriber must unsubscribe from
    /// everything it depends on and leave the registry.
    fn about_to_be_deleted(&self, owning_view: Option<SubscriberId>);

    /// A property this subscriber depends on is being torn down.
    fn source_about_to_be_deleted(&self, _source: SubscriberId) {}

    /// Remove `subscriber` from this entity's own subscriber list.
    ///
    /// Only properties have subscribers; everything else returns `false`.
    fn unlink_subscriber(&self, _subscriber: SubscriberId) -> bool {
        false
    }

    /// Human readable name for diagnostics.
    fn info(&self) -> Option<String> {
        None
    }
}

/// Subscriber that wants the new value of a single property.
pub trait SinglePropertySubscriber<V>: PropertySubscriber {
    /// The observed property changed to `new_value`.
    fn has_changed(&self, new_value: &V);
}

/// Subscriber that observes several properties and discriminates by name.
pub trait MultiPropertySubscriber: PropertySubscriber {
    /// The property named `info` changed.
    fn property_has_changed(&self, info: Option<&str>);

    /// The property named `info` was read.
    fn property_read(&self, _info: Option<&str>) {}
}

enum Target<V> {
    Single(Weak<dyn SinglePropertySubscriber<V>>),
    Multi(Weak<dyn MultiPropertySubscriber>),
}

/// A property's non-owning handle to one of its subscribers.
///
/// Holds a weak reference, so a property never keeps its subscribers alive.
pub struct Subscription<V> {
    id: SubscriberId,
    target: Target<V>,
}

impl<V: 'static> Subscription<V> {
    /// Subscribe with the single-property capability.
    ///
    /// Registers `subscriber` with the [`SubscriberManager`] if it is not
    /// registered yet. Its later `about_to_be_deleted` must remove that entry.
    pub fn single<S>(subscriber: &Rc<S>) -> Self
    where
        S: SinglePropertySubscriber<V> + 'static,
    {
        SubscriberManager::ensure_registered(subscriber);
        let weak = Rc::downgrade(subscriber);
        let weak: Weak<dyn SinglePropertySubscriber<V>> = weak;
        Self {
            id: subscriber.id(),
            target: Target::Single(weak),
        }
    }

    /// Subscribe with the multi-property capability. Registers like
    /// [`single`](Self::single).
    pub fn multi<S>(subscriber: &Rc<S>) -> Self
    where
        S: MultiPropertySubscriber + 'static,
    {
        SubscriberManager::ensure_registered(subscriber);
        let weak = Rc::downgrade(subscriber);
        let weak: Weak<dyn MultiPropertySubscriber> = weak;
        Self::from_multi(subscriber.id(), weak)
    }

    pub(crate) fn from_multi(id: SubscriberId, weak: Weak<dyn MultiPropertySubscriber>) -> Self {
        Self {
            id,
            target: Target::Multi(weak),
        }
    }
}

impl<V> Subscription<V> {
    /// Identity of the subscriber.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether this subscription uses the multi-property capability.
    pub fn is_multi(&self) -> bool {
        matches!(self.target, Target::Multi(_))
    }

    /// Deliver a change. Returns `false` if the subscriber no longer exists.
    pub(crate) fn deliver_change(&self, new_value: &V, info: Option<&str>) -> bool {
        match &self.target {
            Target::Single(weak) => weak
                .upgrade()
                .map(|subscriber| subscriber.has_changed(new_value))
                .is_some(),
            Target::Multi(weak) => weak
                .upgrade()
                .map(|subscriber| subscriber.property_has_changed(info))
                .is_some(),
        }
    }

    /// Deliver a read notification. Single-property subscribers ignore reads.
    pub(crate) fn deliver_read(&self, info: Option<&str>) {
        if let Target::Multi(weak) = &self.target {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.property_read(info);
            }
        }
    }

    /// Tell the subscriber that `source` is being torn down.
    pub(crate) fn deliver_source_deleted(&self, source: SubscriberId) {
        match &self.target {
            Target::Single(weak) => {
                if let Some(subscriber) = weak.upgrade() {
                    subscriber.source_about_to_be_deleted(source);
                }
            }
            Target::Multi(weak) => {
                if let Some(subscriber) = weak.upgrade() {
                    subscriber.source_about_to_be_deleted(source);
                }
            }
        }
    }
}

impl<V> Clone for Subscription<V> {
    fn clone(&self) -> Self {
        let target = match &self.target {
            Target::Single(weak) => Target::Single(Weak::clone(weak)),
            Target::Multi(weak) => Target::Multi(Weak::clone(weak)),
        };
        Self { id: self.id, target }
    }
}

impl<V> fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("multi", &self.is_multi())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct Recorder {
        id: SubscriberId,
        values: RefCell<Vec<i32>>,
        names: RefCell<Vec<Option<String>>>,
        reads: Cell<usize>,
    }

    impl Recorder {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: SubscriberId::new(),
                values: RefCell::new(Vec::new()),
                names: RefCell::new(Vec::new()),
                reads: Cell::new(0),
            })
        }
    }

    impl PropertySubscriber for Recorder {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {}
    }

    impl SinglePropertySubscriber<i32> for Recorder {
        fn has_changed(&self, new_value: &i32) {
            self.values.borrow_mut().push(*new_value);
        }
    }

    impl MultiPropertySubscriber for Recorder {
        fn property_has_changed(&self, info: Option<&str>) {
            self.names.borrow_mut().push(info.map(str::to_owned));
        }

        fn property_read(&self, _info: Option<&str>) {
            self.reads.set(self.reads.get() + 1);
        }
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
        assert!(id1 < id2 && id2 < id3);
    }

    #[test]
    fn single_capability_receives_value() {
        let recorder = Recorder::new();
        let subscription = Subscription::<i32>::single(&recorder);

        assert!(!subscription.is_multi());
        assert!(subscription.deliver_change(&5, Some("count")));
        subscription.deliver_read(Some("count"));

        assert_eq!(*recorder.values.borrow(), vec![5]);
        assert!(recorder.names.borrow().is_empty());
        assert_eq!(recorder.reads.get(), 0);
    }

    #[test]
    fn multi_capability_receives_name() {
        let recorder = Recorder::new();
        let subscription = Subscription::<i32>::multi(&recorder);

        assert!(subscription.is_multi());
        assert!(subscription.deliver_change(&5, Some("count")));
        subscription.deliver_read(None);

        assert!(recorder.values.borrow().is_empty());
        assert_eq!(*recorder.names.borrow(), vec![Some("count".to_string())]);
        assert_eq!(recorder.reads.get(), 1);
    }

    #[test]
    fn dropped_subscriber_is_reported_gone() {
        let recorder = Recorder::new();
        let subscription = Subscription::<i32>::single(&recorder);
        drop(recorder);

        assert!(!subscription.deliver_change(&1, None));
    }
}
