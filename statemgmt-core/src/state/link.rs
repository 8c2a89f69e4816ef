//! Two-Way Link
//!
//! A two-way link mirrors a source property into a derived context, such as
//! a child view's field bound to a parent's state. Writes on either side
//! reach the other.
//!
//! # How Links Work
//!
//! 1. On construction the link copies the source value and subscribes to
//!    the source with the single-property capability.
//!
//! 2. A write on the link writes through to the source (which notifies its
//!    other dependents), then updates the cached copy and notifies the
//!    link's own subscribers.
//!
//! 3. A change arriving from the source updates the cached copy and
//!    notifies the link's own subscribers.
//!
//! # Cycles
//!
//! Writing through to the source makes the source notify the link back.
//! A per-link `syncing` flag is raised for the duration of the write-through.
//! While it is up, re-entrant notifications from the source are dropped and
//! re-entrant writes on the link are refused, so the link and its source
//! always settle on the value of the outermost write.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::prop::SyncedPropertyOneWay;
use super::property::{ObservedProperty, PropertyCore};
use super::registry::SubscriberManager;
use super::subscriber::{PropertySubscriber, SinglePropertySubscriber, SubscriberId, Subscription};
use crate::error::{report_violation, Result, StateError};

/// Restores the syncing flag when the write-through finishes or unwinds.
struct SyncGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> SyncGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// A property kept in sync with a source property in both directions.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservedPropertySimple::new(0, Some(Subscription::multi(&parent)), Some("count"));
/// let link = SyncedPropertyTwoWay::new(count.clone(), Some(Subscription::multi(&child)), Some("count"));
///
/// link.set(3);
/// assert_eq!(count.get(), 3);
///
/// count.set(4);
/// assert_eq!(link.get(), 4);
/// ```
pub struct SyncedPropertyTwoWay<V> {
    core: PropertyCore<V>,

    /// The source. Kept after detaching for its equality.
    source: Rc<dyn ObservedProperty<V>>,

    /// Whether the link is still subscribed to `source`.
    attached: Cell<bool>,

    /// Local copy of the source value.
    cached: RefCell<V>,

    /// Raised while a local write is being written through to the source.
    syncing: Cell<bool>,
}

impl<V: Clone + 'static> SyncedPropertyTwoWay<V> {
    /// Create a link to `source` and subscribe it.
    pub fn new(
        source: Rc<dyn ObservedProperty<V>>,
        owner: Option<Subscription<V>>,
        info: Option<&str>,
    ) -> Rc<Self> {
        let cached = source.get_untracked();
        let link = Rc::new(Self {
            core: PropertyCore::new("SyncedPropertyTwoWay", owner, info),
            source,
            attached: Cell::new(true),
            cached: RefCell::new(cached),
            syncing: Cell::new(false),
        });
        SubscriberManager::register(&link);
        link.source.subscribe(Subscription::single(&link));

        debug!(id = %link.core.id(), info = %link.core.label(), source = %link.source.id(),
            "SyncedPropertyTwoWay: linked");
        link
    }

    /// Identity of the source property.
    pub fn source_id(&self) -> SubscriberId {
        self.source.id()
    }

    /// Whether the link still follows its source.
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    /// Whether the link has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.core.is_deleted()
    }

    fn write_through(&self, new_value: V) {
        if !self.attached.get() {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyTwoWay: detached, write stays local");
            return;
        }
        let _guard = SyncGuard::raise(&self.syncing);
        self.source.set(new_value);
    }
}

impl<V: Clone + 'static> PropertySubscriber for SyncedPropertyTwoWay<V> {
    fn id(&self) -> SubscriberId {
        self.core.id()
    }

    fn about_to_be_deleted(&self, owning_view: Option<SubscriberId>) {
        if self.attached.replace(false) {
            self.source.unlink_subscriber(self.core.id());
        }
        self.core.about_to_be_deleted(owning_view);
    }

    fn source_about_to_be_deleted(&self, source: SubscriberId) {
        if source == self.source.id() && self.attached.replace(false) {
            debug!(id = %self.core.id(), info = %self.core.label(), %source,
                "SyncedPropertyTwoWay: source deleted, detaching");
        }
    }

    fn unlink_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.core.unlink(subscriber)
    }

    fn info(&self) -> Option<String> {
        self.core.info()
    }
}

impl<V: Clone + 'static> SinglePropertySubscriber<V> for SyncedPropertyTwoWay<V> {
    fn has_changed(&self, new_value: &V) {
        if self.core.is_deleted() {
            report_violation(StateError::StaleSubscriberAccess {
                subscriber: self.core.id(),
                property: self.source.id(),
            });
            return;
        }
        if self.syncing.get() {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyTwoWay: re-entrant source notification suppressed");
            return;
        }
        if self.source.same_value(&*self.cached.borrow(), new_value) {
            return;
        }

        debug!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyTwoWay: source changed");
        *self.cached.borrow_mut() = new_value.clone();
        self.core.notify_has_changed(new_value);
    }
}

impl<V: Clone + 'static> ObservedProperty<V> for SyncedPropertyTwoWay<V> {
    fn get(&self) -> V {
        trace!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyTwoWay: get");
        self.core.notify_property_read();
        self.cached.borrow().clone()
    }

    fn get_untracked(&self) -> V {
        self.cached.borrow().clone()
    }

    fn set(&self, new_value: V) {
        if self.core.is_deleted() {
            warn!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyTwoWay: set after teardown ignored");
            return;
        }
        if self.syncing.get() {
            warn!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyTwoWay: re-entrant set during write-through ignored");
            return;
        }
        if self.source.same_value(&*self.cached.borrow(), &new_value) {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyTwoWay: set with unchanged value - ignoring");
            return;
        }

        debug!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyTwoWay: set, writing through");
        self.write_through(new_value.clone());
        *self.cached.borrow_mut() = new_value.clone();
        self.core.notify_has_changed(&new_value);
    }

    fn same_value(&self, a: &V, b: &V) -> bool {
        self.source.same_value(a, b)
    }

    fn subscribe(&self, subscription: Subscription<V>) {
        self.core.subscribe(subscription);
    }

    fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    fn set_info(&self, name: &str) {
        self.core.set_info(name);
    }

    fn create_link(
        self: Rc<Self>,
        owner: Option<Subscription<V>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<V>>> {
        Ok(SyncedPropertyTwoWay::new(self, owner, name))
    }

    fn create_prop(
        self: Rc<Self>,
        owner: Option<Subscription<V>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<V>>> {
        Ok(SyncedPropertyOneWay::subscribing(self, owner, name))
    }
}

impl<V: Clone + fmt::Debug + 'static> fmt::Debug for SyncedPropertyTwoWay<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedPropertyTwoWay")
            .field("id", &self.core.id())
            .field("info", &self.core.info())
            .field("source", &self.source.id())
            .field("attached", &self.attached.get())
            .field("value", &*self.cached.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ObservedPropertySimple;

    struct Listener {
        id: SubscriberId,
        seen: RefCell<Vec<i32>>,
    }

    impl Listener {
        fn new() -> Rc<Self> {
            let listener = Rc::new(Self {
                id: SubscriberId::new(),
                seen: RefCell::new(Vec::new()),
            });
            SubscriberManager::add(&listener).unwrap();
            listener
        }
    }

    impl PropertySubscriber for Listener {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
            SubscriberManager::delete(self.id);
        }
    }

    impl SinglePropertySubscriber<i32> for Listener {
        fn has_changed(&self, new_value: &i32) {
            self.seen.borrow_mut().push(*new_value);
        }
    }

    #[test]
    fn link_subscribes_to_source() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(1, None, Some("count"));
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, Some("count"));

        assert_eq!(link.get(), 1);
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(link.source_id(), source.id());
        assert!(link.is_attached());
    }

    #[test]
    fn write_on_link_reaches_source() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(1, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);

        link.set(5);
        assert_eq!(source.get(), 5);
        assert_eq!(link.get(), 5);
    }

    #[test]
    fn write_on_source_reaches_link() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(1, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);

        source.set(9);
        assert_eq!(link.get(), 9);
    }

    #[test]
    fn link_write_notifies_each_side_once() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);
        let on_source = Listener::new();
        let on_link = Listener::new();
        source.subscribe(Subscription::single(&on_source));
        link.subscribe(Subscription::single(&on_link));

        link.set(3);
        assert_eq!(*on_source.seen.borrow(), vec![3]);
        assert_eq!(*on_link.seen.borrow(), vec![3]);

        source.set(4);
        assert_eq!(*on_source.seen.borrow(), vec![3, 4]);
        assert_eq!(*on_link.seen.borrow(), vec![3, 4]);
    }

    #[test]
    fn sibling_links_stay_consistent() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let left = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);
        let right = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);

        left.set(11);
        assert_eq!(right.get(), 11);
        right.set(12);
        assert_eq!(left.get(), 12);
        assert_eq!(source.get(), 12);
    }

    #[test]
    fn chained_links_round_trip() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let first = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);
        let second = first.clone().create_link(None, Some("nested")).unwrap();

        second.set(8);
        assert_eq!(first.get(), 8);
        assert_eq!(source.get(), 8);

        source.set(2);
        assert_eq!(second.get(), 2);
    }

    #[test]
    fn teardown_unsubscribes_from_source() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);
        let listener = Listener::new();
        link.subscribe(Subscription::single(&listener));

        link.about_to_be_deleted(None);
        assert_eq!(source.subscriber_count(), 0);
        assert!(!SubscriberManager::has(link.id()));

        source.set(1);
        assert!(listener.seen.borrow().is_empty());
    }

    #[test]
    fn deleted_source_detaches_link() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);

        source.about_to_be_deleted(None);
        assert!(!link.is_attached());

        link.set(4);
        assert_eq!(link.get(), 4);
        assert_eq!(source.get_untracked(), 0);
    }

    /// Writes back into the link when the source reaches `trigger`.
    struct Echo {
        id: SubscriberId,
        link: RefCell<Option<Rc<SyncedPropertyTwoWay<i32>>>>,
        trigger: i32,
        reply: i32,
    }

    impl PropertySubscriber for Echo {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
            SubscriberManager::delete(self.id);
        }
    }

    impl SinglePropertySubscriber<i32> for Echo {
        fn has_changed(&self, new_value: &i32) {
            if *new_value == self.trigger {
                let link = self.link.borrow().clone();
                if let Some(link) = link {
                    link.set(self.reply);
                }
            }
        }
    }

    #[test]
    fn reentrant_write_during_sync_is_refused() {
        SubscriberManager::reset();
        let source = ObservedPropertySimple::new(0, None, None);
        let link = SyncedPropertyTwoWay::<i32>::new(source.clone(), None, None);
        let echo = Rc::new(Echo {
            id: SubscriberId::new(),
            link: RefCell::new(Some(link.clone())),
            trigger: 1,
            reply: 2,
        });
        SubscriberManager::add(&echo).unwrap();
        source.subscribe(Subscription::single(&echo));
        let on_link = Listener::new();
        link.subscribe(Subscription::single(&on_link));

        link.set(1);
        assert_eq!(source.get(), 1);
        assert_eq!(link.get(), 1);
        assert_eq!(*on_link.seen.borrow(), vec![1]);

        link.set(3);
        assert_eq!(source.get(), 3);
        assert_eq!(link.get(), 3);
        assert_eq!(*on_link.seen.borrow(), vec![1, 3]);

        // The echo outside of a sync pass goes through normally.
        source.set(1);
        assert_eq!(source.get(), 2);
        assert_eq!(link.get(), 2);
        echo.link.borrow_mut().take();
    }
}
