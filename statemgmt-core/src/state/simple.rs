//! Scalar observed property.
//!
//! Holds a plain value (number, flag, string, small enum) and detects
//! changes with `PartialEq`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::link::SyncedPropertyTwoWay;
use super::prop::SyncedPropertyOneWay;
use super::property::{ObservedProperty, PropertyCore};
use super::registry::SubscriberManager;
use super::subscriber::{PropertySubscriber, SubscriberId, Subscription};
use crate::error::Result;

/// An observed property holding a scalar value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservedPropertySimple::new(0, Some(Subscription::multi(&view)), Some("count"));
///
/// count.set(5);  // view.property_has_changed(Some("count"))
/// count.set(5);  // unchanged, nothing happens
/// ```
pub struct ObservedPropertySimple<T> {
    core: PropertyCore<T>,
    value: RefCell<T>,
}

impl<T> ObservedPropertySimple<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create and register a new property.
    pub fn new(value: T, owner: Option<Subscription<T>>, info: Option<&str>) -> Rc<Self> {
        let property = Rc::new(Self {
            core: PropertyCore::new("ObservedPropertySimple", owner, info),
            value: RefCell::new(value),
        });
        SubscriberManager::register(&property);
        property
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.value.borrow());
        self.set(new_value);
    }

    /// Whether the property has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.core.is_deleted()
    }
}

impl<T> PropertySubscriber for ObservedPropertySimple<T>
where
    T: Clone + PartialEq + 'static,
{
    fn id(&self) -> SubscriberId {
        self.core.id()
    }

    fn about_to_be_deleted(&self, owning_view: Option<SubscriberId>) {
        self.core.about_to_be_deleted(owning_view);
    }

    fn unlink_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.core.unlink(subscriber)
    }

    fn info(&self) -> Option<String> {
        self.core.info()
    }
}

impl<T> ObservedProperty<T> for ObservedPropertySimple<T>
where
    T: Clone + PartialEq + 'static,
{
    fn get(&self) -> T {
        trace!(id = %self.core.id(), info = %self.core.label(), "ObservedPropertySimple: get");
        self.core.notify_property_read();
        self.value.borrow().clone()
    }

    fn get_untracked(&self) -> T {
        self.value.borrow().clone()
    }

    fn set(&self, new_value: T) {
        if self.core.is_deleted() {
            warn!(id = %self.core.id(), info = %self.core.label(),
                "ObservedPropertySimple: set after teardown ignored");
            return;
        }
        if *self.value.borrow() == new_value {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "ObservedPropertySimple: set with unchanged value - ignoring");
            return;
        }

        debug!(id = %self.core.id(), info = %self.core.label(), "ObservedPropertySimple: set, changed");
        *self.value.borrow_mut() = new_value.clone();
        self.core.notify_has_changed(&new_value);
    }

    fn same_value(&self, a: &T, b: &T) -> bool {
        a == b
    }

    fn subscribe(&self, subscription: Subscription<T>) {
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
        owner: Option<Subscription<T>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<T>>> {
        Ok(SyncedPropertyTwoWay::new(self, owner, name))
    }

    fn create_prop(
        self: Rc<Self>,
        owner: Option<Subscription<T>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<T>>> {
        Ok(SyncedPropertyOneWay::subscribing(self, owner, name))
    }
}

impl<T> fmt::Debug for ObservedPropertySimple<T>
where
    T: Clone + PartialEq + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedPropertySimple")
            .field("id", &self.core.id())
            .field("info", &self.core.info())
            .field("value", &*self.value.borrow())
            .field("subscriber_count", &self.core.subscriber_count())
            .finish()
    }
}
