//! Observed Property
//!
//! An observed property holds one piece of state, is owned by at most one
//! subscriber (usually the view that declared it) and notifies its
//! subscribers when the value changes.
//!
//! # How Notification Works
//!
//! 1. `set(value)` compares the new value with the current one using the
//!    property's equality. Equal values are ignored.
//!
//! 2. Otherwise the value is stored and every subscriber is notified through
//!    the capability it subscribed with: `has_changed(value)` for
//!    single-property subscribers, `property_has_changed(info)` for
//!    multi-property subscribers.
//!
//! 3. `get()` notifies multi-property subscribers of the read and, when a
//!    view is rendering, subscribes that view lazily.
//!
//! # Teardown
//!
//! `about_to_be_deleted` tells every dependent (other than the owner) that
//! this property is going away, drops all subscriptions and leaves the
//! registry. Subscribing registers a subscriber, so delivering to one that
//! has since left the registry is a teardown-ordering defect and is reported
//! as `StaleSubscriberAccess`. A subscriber that was dropped without teardown
//! is unlinked quietly.
//!
//! The shared bookkeeping lives in [`PropertyCore`]; the concrete property
//! kinds wrap it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::RenderContext;
use super::link::SyncedPropertyTwoWay;
use super::prop::SyncedPropertyOneWay;
use super::registry::SubscriberManager;
use super::subscriber::{PropertySubscriber, SubscriberId, Subscription};
use crate::error::{report_violation, Result, StateError};

type SubscriberList<V> = SmallVec<[Subscription<V>; 4]>;

/// Common interface of every observed property kind.
pub trait ObservedProperty<V>: PropertySubscriber {
    /// Current value. Notifies read-tracking subscribers.
    fn get(&self) -> V;

    /// Current value without read notifications.
    fn get_untracked(&self) -> V;

    /// Replace the value, notifying subscribers if it differs.
    fn set(&self, new_value: V);

    /// The equality used for change detection.
    fn same_value(&self, a: &V, b: &V) -> bool;

    /// Add a subscriber. Subscribing the same identity twice replaces the
    /// earlier subscription.
    fn subscribe(&self, subscription: Subscription<V>);

    /// Number of current subscribers, the owner included.
    fn subscriber_count(&self) -> usize;

    /// Rename the property. Empty names are ignored.
    fn set_info(&self, name: &str);

    /// Create a two-way link with this property as its source.
    fn create_link(
        self: Rc<Self>,
        owner: Option<Subscription<V>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<V>>>;

    /// Create a one-way prop that follows this property.
    fn create_prop(
        self: Rc<Self>,
        owner: Option<Subscription<V>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<V>>>;
}

/// Subscriber bookkeeping shared by all property kinds.
pub struct PropertyCore<V> {
    /// Identity of the property itself.
    id: SubscriberId,

    /// Type name used in diagnostics.
    kind: &'static str,

    /// Name of the bound field, passed to multi-property subscribers.
    info: RefCell<Option<String>>,

    /// The owning subscriber, if any. Also present in `subscribers`.
    owner: Option<SubscriberId>,

    /// Everything that gets notified on change.
    subscribers: RefCell<SubscriberList<V>>,

    /// Set once `about_to_be_deleted` ran.
    deleted: Cell<bool>,
}

impl<V: 'static> PropertyCore<V> {
    /// Create the bookkeeping for a new property.
    pub fn new(kind: &'static str, owner: Option<Subscription<V>>, info: Option<&str>) -> Self {
        let owner_id = owner.as_ref().map(Subscription::id);
        let mut subscribers = SubscriberList::new();
        subscribers.extend(owner);

        Self {
            id: SubscriberId::new(),
            kind,
            info: RefCell::new(info.filter(|name| !name.is_empty()).map(str::to_owned)),
            owner: owner_id,
            subscribers: RefCell::new(subscribers),
            deleted: Cell::new(false),
        }
    }

    /// Identity of the property.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The property name, if one was given.
    pub fn info(&self) -> Option<String> {
        self.info.borrow().clone()
    }

    /// The property name or `"unknown"`, for logging.
    pub fn label(&self) -> String {
        self.info().unwrap_or_else(|| "unknown".to_string())
    }

    /// Rename the property. Empty names are ignored.
    pub fn set_info(&self, name: &str) {
        if !name.is_empty() {
            *self.info.borrow_mut() = Some(name.to_owned());
        }
    }

    /// The owning subscriber.
    pub fn owner(&self) -> Option<SubscriberId> {
        self.owner
    }

    /// Whether the property has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    /// Add a subscriber, replacing an earlier subscription with the same identity.
    pub fn subscribe(&self, subscription: Subscription<V>) {
        if self.is_deleted() {
            warn!(id = %self.id, info = %self.label(), subscriber = %subscription.id(),
                "{}: subscribe after teardown ignored", self.kind);
            return;
        }

        debug!(id = %self.id, info = %self.label(), subscriber = %subscription.id(),
            "{}: new subscriber", self.kind);
        let mut subscribers = self.subscribers.borrow_mut();
        match subscribers.iter_mut().find(|existing| existing.id() == subscription.id()) {
            Some(existing) => *existing = subscription,
            None => subscribers.push(subscription),
        }
    }

    /// Remove a subscriber. Returns whether it was subscribed.
    pub fn unlink(&self, subscriber: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|subscription| subscription.id() != subscriber);
        before != subscribers.len()
    }

    /// Whether `subscriber` is currently subscribed.
    pub fn is_subscribed(&self, subscriber: SubscriberId) -> bool {
        self.subscribers
            .borrow()
            .iter()
            .any(|subscription| subscription.id() == subscriber)
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Notify every subscriber that the value changed to `new_value`.
    ///
    /// Works on a snapshot so subscribers may subscribe or unlink while
    /// being notified. Subscribers unlinked earlier in the same pass are
    /// skipped.
    pub fn notify_has_changed(&self, new_value: &V) {
        let snapshot: SubscriberList<V> = self.subscribers.borrow().clone();
        debug!(id = %self.id, info = %self.label(), subscribers = snapshot.len(),
            "{}: notifyHasChanged", self.kind);

        let info = self.info();
        for subscription in snapshot {
            if !self.is_subscribed(subscription.id()) {
                continue;
            }
            if !SubscriberManager::has(subscription.id()) {
                self.report_stale(subscription.id());
            } else if !subscription.deliver_change(new_value, info.as_deref()) {
                self.prune_dropped(subscription.id());
            }
        }
    }

    /// Notify read-tracking subscribers of a read and record the read in
    /// the render context.
    pub fn notify_property_read(&self) {
        if self.is_deleted() {
            return;
        }

        if let Some((view_id, view)) = RenderContext::current() {
            RenderContext::track_read(self.id);
            if !self.is_subscribed(view_id) {
                trace!(id = %self.id, info = %self.label(), view = %view_id,
                    "{}: subscribing rendering view", self.kind);
                self.subscribe(Subscription::from_multi(view_id, view));
            }
        }

        let snapshot: SubscriberList<V> = self.subscribers.borrow().clone();
        let info = self.info();
        for subscription in snapshot.iter().filter(|subscription| subscription.is_multi()) {
            subscription.deliver_read(info.as_deref());
        }
    }

    /// Tear down: notify dependents, drop all subscriptions, leave the registry.
    ///
    /// `owning_view` and the owner are not notified; they are the ones
    /// deleting this property. Calling this twice is a no-op.
    pub fn about_to_be_deleted(&self, owning_view: Option<SubscriberId>) {
        if self.deleted.replace(true) {
            return;
        }

        let subscribers = std::mem::take(&mut *self.subscribers.borrow_mut());
        debug!(id = %self.id, info = %self.label(), subscribers = subscribers.len(),
            "{}: aboutToBeDeleted", self.kind);

        for subscription in subscribers {
            let id = subscription.id();
            if Some(id) == owning_view || Some(id) == self.owner {
                continue;
            }
            subscription.deliver_source_deleted(self.id);
        }

        SubscriberManager::delete(self.id);
    }

    fn prune_dropped(&self, subscriber: SubscriberId) {
        warn!(id = %self.id, info = %self.label(), %subscriber,
            "{}: subscriber dropped without teardown, unlinking", self.kind);
        self.unlink(subscriber);
        SubscriberManager::delete(subscriber);
    }

    fn report_stale(&self, subscriber: SubscriberId) {
        self.unlink(subscriber);
        report_violation(StateError::StaleSubscriberAccess {
            subscriber,
            property: self.id,
        });
    }
}

impl<V> Drop for PropertyCore<V> {
    fn drop(&mut self) {
        SubscriberManager::forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StateConfig, ViolationPolicy};
    use crate::state::{MultiPropertySubscriber, SinglePropertySubscriber};
    use std::rc::Rc;

    struct Counter {
        id: SubscriberId,
        changes: Cell<usize>,
        detached_from: RefCell<Vec<SubscriberId>>,
    }

    impl Counter {
        fn registered() -> Rc<Self> {
            let counter = Rc::new(Self {
                id: SubscriberId::new(),
                changes: Cell::new(0),
                detached_from: RefCell::new(Vec::new()),
            });
            SubscriberManager::add(&counter).unwrap();
            counter
        }
    }

    impl PropertySubscriber for Counter {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
            SubscriberManager::delete(self.id);
        }

        fn source_about_to_be_deleted(&self, source: SubscriberId) {
            self.detached_from.borrow_mut().push(source);
        }
    }

    impl SinglePropertySubscriber<u8> for Counter {
        fn has_changed(&self, _new_value: &u8) {
            self.changes.set(self.changes.get() + 1);
        }
    }

    impl MultiPropertySubscriber for Counter {
        fn property_has_changed(&self, _info: Option<&str>) {
            self.changes.set(self.changes.get() + 1);
        }
    }

    #[test]
    fn owner_is_first_subscriber() {
        SubscriberManager::reset();
        let owner = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", Some(Subscription::multi(&owner)), Some("flag"));

        assert_eq!(core.owner(), Some(owner.id));
        assert!(core.is_subscribed(owner.id));
        assert_eq!(core.subscriber_count(), 1);
        assert_eq!(core.info().as_deref(), Some("flag"));
    }

    #[test]
    fn empty_info_is_ignored() {
        let core = PropertyCore::<u8>::new("Test", None, Some(""));
        assert_eq!(core.label(), "unknown");

        core.set_info("");
        assert!(core.info().is_none());

        core.set_info("volume");
        assert_eq!(core.info().as_deref(), Some("volume"));
    }

    #[test]
    fn resubscribe_replaces() {
        SubscriberManager::reset();
        let counter = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", None, None);

        core.subscribe(Subscription::single(&counter));
        core.subscribe(Subscription::multi(&counter));
        assert_eq!(core.subscriber_count(), 1);

        core.notify_has_changed(&1);
        assert_eq!(counter.changes.get(), 1);
    }

    #[test]
    fn unlink_is_idempotent() {
        SubscriberManager::reset();
        let counter = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", None, None);
        core.subscribe(Subscription::single(&counter));

        assert!(core.unlink(counter.id));
        assert!(!core.unlink(counter.id));
        core.notify_has_changed(&1);
        assert_eq!(counter.changes.get(), 0);
    }

    #[test]
    fn teardown_detaches_dependents_but_not_owner() {
        SubscriberManager::reset();
        let owner = Counter::registered();
        let dependent = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", Some(Subscription::multi(&owner)), None);
        core.subscribe(Subscription::single(&dependent));

        core.about_to_be_deleted(Some(owner.id));
        core.about_to_be_deleted(Some(owner.id));

        assert!(core.is_deleted());
        assert_eq!(core.subscriber_count(), 0);
        assert!(owner.detached_from.borrow().is_empty());
        assert_eq!(*dependent.detached_from.borrow(), vec![core.id()]);

        core.subscribe(Subscription::single(&dependent));
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    fn subscribing_registers_the_subscriber() {
        SubscriberManager::reset();
        StateConfig {
            on_violation: ViolationPolicy::Panic,
            ..StateConfig::default()
        }
        .install();

        let counter = Rc::new(Counter {
            id: SubscriberId::new(),
            changes: Cell::new(0),
            detached_from: RefCell::new(Vec::new()),
        });
        let core = PropertyCore::<u8>::new("Test", None, None);
        core.subscribe(Subscription::single(&counter));
        assert!(SubscriberManager::has(counter.id));

        core.notify_has_changed(&20);
        assert_eq!(counter.changes.get(), 1);
        assert_eq!(core.subscriber_count(), 1);
    }

    #[test]
    fn dropped_subscriber_is_unlinked_without_violation() {
        SubscriberManager::reset();
        StateConfig {
            on_violation: ViolationPolicy::Panic,
            ..StateConfig::default()
        }
        .install();

        let counter = Counter::registered();
        let id = counter.id;
        let core = PropertyCore::<u8>::new("Test", None, None);
        core.subscribe(Subscription::single(&counter));
        drop(counter);

        core.notify_has_changed(&1);
        assert_eq!(core.subscriber_count(), 0);
        assert!(!SubscriberManager::has(id));
    }

    #[test]
    fn deleted_subscriber_is_pruned_under_log_policy() {
        SubscriberManager::reset();
        StateConfig {
            on_violation: ViolationPolicy::Log,
            ..StateConfig::default()
        }
        .install();

        let counter = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", None, None);
        core.subscribe(Subscription::single(&counter));
        SubscriberManager::delete(counter.id);

        core.notify_has_changed(&3);
        assert_eq!(counter.changes.get(), 0);
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    #[should_panic(expected = "torn down")]
    fn deleted_subscriber_panics_under_panic_policy() {
        SubscriberManager::reset();
        StateConfig {
            on_violation: ViolationPolicy::Panic,
            ..StateConfig::default()
        }
        .install();

        let counter = Counter::registered();
        let core = PropertyCore::<u8>::new("Test", None, None);
        core.subscribe(Subscription::single(&counter));
        counter.about_to_be_deleted(None);

        core.notify_has_changed(&3);
    }
}
