//! Object-typed observed property.
//!
//! Holds a shared `Rc<T>`. By default a change means a different object
//! (reference identity); [`value_equality`] switches to comparing contents.
//! Objects with interior mutability announce in-place changes through
//! [`ObservedPropertyObject::notify_mutated`].

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::link::SyncedPropertyTwoWay;
use super::prop::SyncedPropertyOneWay;
use super::property::{ObservedProperty, PropertyCore};
use super::registry::SubscriberManager;
use super::subscriber::{PropertySubscriber, SubscriberId, Subscription};
use crate::error::{Result, StateError};

/// Change detection for object values.
pub type ObjectEquality<T> = fn(&Rc<T>, &Rc<T>) -> bool;

/// Two values are the same object.
pub fn identity_equality<T>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::ptr_eq(a, b)
}

/// Two values are the same object or have equal contents.
pub fn value_equality<T: PartialEq>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::ptr_eq(a, b) || **a == **b
}

/// An observed property holding a shared object.
pub struct ObservedPropertyObject<T> {
    core: PropertyCore<Rc<T>>,
    value: RefCell<Rc<T>>,
    equality: ObjectEquality<T>,
}

impl<T: 'static> ObservedPropertyObject<T> {
    /// Create and register a new property with identity equality.
    pub fn new(value: Rc<T>, owner: Option<Subscription<Rc<T>>>, info: Option<&str>) -> Rc<Self> {
        Self::with_equality(value, owner, info, identity_equality::<T>)
    }

    /// Create and register a new property with a custom equality.
    pub fn with_equality(
        value: Rc<T>,
        owner: Option<Subscription<Rc<T>>>,
        info: Option<&str>,
        equality: ObjectEquality<T>,
    ) -> Rc<Self> {
        let property = Rc::new(Self {
            core: PropertyCore::new("ObservedPropertyObject", owner, info),
            value: RefCell::new(value),
            equality,
        });
        SubscriberManager::register(&property);
        property
    }

    /// Announce that the current object was mutated in place.
    pub fn notify_mutated(&self) {
        if self.core.is_deleted() {
            return;
        }
        debug!(id = %self.core.id(), info = %self.core.label(), "ObservedPropertyObject: object mutated");
        let current = Rc::clone(&self.value.borrow());
        self.core.notify_has_changed(&current);
    }

    /// Whether the property has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.core.is_deleted()
    }
}

impl<T: 'static> PropertySubscriber for ObservedPropertyObject<T> {
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

impl<T: 'static> ObservedProperty<Rc<T>> for ObservedPropertyObject<T> {
    fn get(&self) -> Rc<T> {
        trace!(id = %self.core.id(), info = %self.core.label(), "ObservedPropertyObject: get");
        self.core.notify_property_read();
        Rc::clone(&self.value.borrow())
    }

    fn get_untracked(&self) -> Rc<T> {
        Rc::clone(&self.value.borrow())
    }

    fn set(&self, new_value: Rc<T>) {
        if self.core.is_deleted() {
            warn!(id = %self.core.id(), info = %self.core.label(),
                "ObservedPropertyObject: set after teardown ignored");
            return;
        }
        if (self.equality)(&*self.value.borrow(), &new_value) {
            trace!(id = %self.core.id(), info = %self.core.label(),
                "ObservedPropertyObject: set with unchanged value - ignoring");
            return;
        }

        debug!(id = %self.core.id(), info = %self.core.label(), "ObservedPropertyObject: set, changed");
        *self.value.borrow_mut() = Rc::clone(&new_value);
        self.core.notify_has_changed(&new_value);
    }

    fn same_value(&self, a: &Rc<T>, b: &Rc<T>) -> bool {
        (self.equality)(a, b)
    }

    fn subscribe(&self, subscription: Subscription<Rc<T>>) {
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
        owner: Option<Subscription<Rc<T>>>,
        name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<Rc<T>>>> {
        Ok(SyncedPropertyTwoWay::new(self, owner, name))
    }

    fn create_prop(
        self: Rc<Self>,
        _owner: Option<Subscription<Rc<T>>>,
        _name: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<Rc<T>>>> {
        Err(StateError::UnsupportedLink("one-way prop of an object-typed property"))
    }
}
