//! One-way synced property.
//!
//! A prop is a child's private copy of a value handed down by its parent.
//! Local writes stay local and notify the prop's own subscribers. A
//! subscribing prop additionally follows its source: every source change is
//! copied in, overwriting local edits.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::link::SyncedPropertyTwoWay;
use super::property::{ObservedProperty, PropertyCore};
use super::registry::SubscriberManager;
use super::subscriber::{PropertySubscriber, SinglePropertySubscriber, SubscriberId, Subscription};
use crate::error::{report_violation, Result, StateError};

/// Where a prop's value comes from.
enum Origin<V> {
    /// Initialized once; compared with `PartialEq`.
    Local(fn(&V, &V) -> bool),
    /// Follows a source property and uses its equality.
    Source(Rc<dyn ObservedProperty<V>>),
}

/// A one-way synced copy of a value.
pub struct SyncedPropertyOneWay<V> {
    core: PropertyCore<V>,
    value: RefCell<V>,
    origin: Origin<V>,
    attached: Cell<bool>,
}

impl<V: Clone + 'static> SyncedPropertyOneWay<V> {
    /// Create a prop initialized with `value`. The parent updates it with `set`.
    pub fn new(value: V, owner: Option<Subscription<V>>, info: Option<&str>) -> Rc<Self>
    where
        V: PartialEq,
    {
        Self::build(value, Origin::Local(<V as PartialEq>::eq), owner, info)
    }

    /// Create a prop that copies every change of `source`.
    pub fn subscribing(
        source: Rc<dyn ObservedProperty<V>>,
        owner: Option<Subscription<V>>,
        info: Option<&str>,
    ) -> Rc<Self> {
        let value = source.get_untracked();
        let prop = Self::build(value, Origin::Source(source), owner, info);
        if let Origin::Source(source) = &prop.origin {
            source.subscribe(Subscription::single(&prop));
        }
        prop
    }

    fn build(value: V, origin: Origin<V>, owner: Option<Subscription<V>>, info: Option<&str>) -> Rc<Self> {
        let attached = matches!(origin, Origin::Source(_));
        let prop = Rc::new(Self {
            core: PropertyCore::new("SyncedPropertyOneWay", owner, info),
            value: RefCell::new(value),
            origin,
            attached: Cell::new(attached),
        });
        SubscriberManager::register(&prop);
        prop
    }

    /// Identity of the source property, for subscribing props.
    pub fn source_id(&self) -> Option<SubscriberId> {
        match &self.origin {
            Origin::Source(source) => Some(source.id()),
            Origin::Local(_) => None,
        }
    }

    /// Whether the prop currently follows a source.
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    /// Whether the prop has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.core.is_deleted()
    }
}

impl<V: Clone + 'static> PropertySubscriber for SyncedPropertyOneWay<V> {
    fn id(&self) -> SubscriberId {
        self.core.id()
    }

    fn about_to_be_deleted(&self, owning_view: Option<SubscriberId>) {
        if let Origin::Source(source) = &self.origin {
            if self.attached.replace(false) {
                source.unlink_subscriber(self.core.id());
            }
        }
        self.core.about_to_be_deleted(owning_view);
    }

    fn source_about_to_be_deleted(&self, source: SubscriberId) {
        if self.source_id() == Some(source) && self.attached.replace(false) {
            debug!(id = %self.core.id(), info = %self.core.label(), %source,
                "SyncedPropertyOneWay: source deleted, detaching");
        }
    }

    fn unlink_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.core.unlink(subscriber)
    }

    fn info(&self) -> Option<String> {
        self.core.info()
    }
}

impl<V: Clone + 'static> SinglePropertySubscriber<V> for SyncedPropertyOneWay<V> {
    fn has_changed(&self, new_value: &V) {
        if self.core.is_deleted() {
            report_violation(StateError::StaleSubscriberAccess {
                subscriber: self.core.id(),
                property: self.source_id().unwrap_or_else(|| self.core.id()),
            });
            return;
        }
        debug!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyOneWay: source changed");
        self.set(new_value.clone());
    }
}

impl<V: Clone + 'static> ObservedProperty<V> for SyncedPropertyOneWay<V> {
    fn get(&self) -> V {
        trace!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyOneWay: get");
        self.core.notify_property_read();
        self.value.borrow().clone()
    }

    fn get_untracked(&self) -> V {
        self.value.borrow().clone()
    }

    fn set(&self, new_value: V) {
        if self.core.is_deleted() {
            warn!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyOneWay: set after teardown ignored");
            return;
        }
        if self.same_value(&*self.value.borrow(), &new_value) {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "SyncedPropertyOneWay: set with unchanged value - ignoring");
            return;
        }

        debug!(id = %self.core.id(), info = %self.core.label(), "SyncedPropertyOneWay: set, changed");
        *self.value.borrow_mut() = new_value.clone();
        self.core.notify_has_changed(&new_value);
    }

    fn same_value(&self, a: &V, b: &V) -> bool {
        match &self.origin {
            Origin::Local(eq) => eq(a, b),
            Origin::Source(source) => source.same_value(a, b),
        }
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
        _owner: Option<Subscription<V>>,
        _name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<V>>> {
        Err(StateError::UnsupportedLink("two-way link from a one-way prop"))
    }

    fn create_prop(
        self: Rc<Self>,
        owner: Option<Subscription<V>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<V>>> {
        Ok(SyncedPropertyOneWay::subscribing(self, owner, name))
    }
}

impl<V: Clone + fmt::Debug + 'static> fmt::Debug for SyncedPropertyOneWay<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedPropertyOneWay")
            .field("id", &self.core.id())
            .field("info", &self.core.info())
            .field("source", &self.source_id())
            .field("value", &*self.value.borrow())
            .finish()
    }
}
