//! Name-keyed property storage.
//!
//! A [`LocalStorage`] holds scalar properties by name, in insertion order.
//! Views link or prop to them instead of declaring the state themselves, so
//! several views can share one value. [`AppStorage`] is the per-thread
//! application-wide instance.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Result, StateError};
use crate::state::{
    MultiPropertySubscriber, ObservedProperty, ObservedPropertySimple, PropertySubscriber, SubscriberId,
    SubscriberManager, Subscription, SyncedPropertyOneWay, SyncedPropertyTwoWay,
};

/// Type-erased view of a stored property.
trait StoredProperty {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
    fn subscriber_count(&self) -> usize;
    fn subscribe_multi(&self, id: SubscriberId, subscriber: Weak<dyn MultiPropertySubscriber>);
    fn unlink(&self, subscriber: SubscriberId) -> bool;
    fn teardown(&self);
}

impl<T: Clone + PartialEq + 'static> StoredProperty for ObservedPropertySimple<T> {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn subscriber_count(&self) -> usize {
        ObservedProperty::subscriber_count(self)
    }

    fn subscribe_multi(&self, id: SubscriberId, subscriber: Weak<dyn MultiPropertySubscriber>) {
        self.subscribe(Subscription::from_multi(id, subscriber));
    }

    fn unlink(&self, subscriber: SubscriberId) -> bool {
        self.unlink_subscriber(subscriber)
    }

    fn teardown(&self) {
        self.about_to_be_deleted(None);
    }
}

/// A store of named scalar properties.
///
/// # Example
///
/// ```rust,ignore
/// let storage = LocalStorage::new();
/// storage.set_or_create("volume", 5);
///
/// let link = storage.link::<i32>("volume", None, Some("volume"))?;
/// link.set(7);
/// assert_eq!(storage.get::<i32>("volume"), Some(7));
/// ```
#[derive(Default)]
pub struct LocalStorage {
    entries: RefCell<IndexMap<String, Rc<dyn StoredProperty>>>,
}

impl LocalStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a property named `name` exists.
    pub fn has(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Number of stored properties.
    pub fn size(&self) -> usize {
        self.entries.borrow().len()
    }

    fn entry(&self, name: &str) -> Option<Rc<dyn StoredProperty>> {
        self.entries.borrow().get(name).cloned()
    }

    /// The property named `name`, typed.
    pub fn typed<T: Clone + PartialEq + 'static>(&self, name: &str) -> Result<Rc<ObservedPropertySimple<T>>> {
        let entry = self
            .entry(name)
            .ok_or_else(|| StateError::UnknownProperty(name.to_owned()))?;
        entry
            .into_any()
            .downcast::<ObservedPropertySimple<T>>()
            .map_err(|_| StateError::PropertyTypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
            })
    }

    /// Current value of `name`, or `None` if it is missing or of another type.
    pub fn get<T: Clone + PartialEq + 'static>(&self, name: &str) -> Option<T> {
        match self.typed::<T>(name) {
            Ok(property) => Some(property.get()),
            Err(err) => {
                debug!(name, %err, "LocalStorage: get");
                None
            }
        }
    }

    /// Write `value` to an existing property. Returns `false` if `name` is
    /// missing or holds another type.
    pub fn set<T: Clone + PartialEq + 'static>(&self, name: &str, value: T) -> bool {
        match self.typed::<T>(name) {
            Ok(property) => {
                property.set(value);
                true
            }
            Err(err) => {
                warn!(name, %err, "LocalStorage: set refused");
                false
            }
        }
    }

    /// Write `value`, creating the property if needed. Returns `false` if
    /// `name` exists with another type.
    pub fn set_or_create<T: Clone + PartialEq + 'static>(&self, name: &str, value: T) -> bool {
        if self.has(name) {
            return self.set(name, value);
        }
        self.create(name, value);
        true
    }

    fn create<T: Clone + PartialEq + 'static>(&self, name: &str, value: T) -> Rc<ObservedPropertySimple<T>> {
        let property = ObservedPropertySimple::new(value, None, Some(name));
        let erased: Rc<dyn StoredProperty> = property.clone();
        self.entries.borrow_mut().insert(name.to_owned(), erased);
        debug!(name, id = %property.id(), "LocalStorage: created");
        property
    }

    fn get_or_create<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        default: T,
    ) -> Result<Rc<ObservedPropertySimple<T>>> {
        if self.has(name) {
            self.typed(name)
        } else {
            Ok(self.create(name, default))
        }
    }

    /// Create a two-way link to `name`.
    pub fn link<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        owner: Option<Subscription<T>>,
        info: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<T>>> {
        self.typed::<T>(name)?.create_link(owner, info)
    }

    /// Like [`link`](Self::link), creating `name` with `default` if missing.
    pub fn set_and_link<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        default: T,
        owner: Option<Subscription<T>>,
        info: Option<&str>,
    ) -> Result<Rc<SyncedPropertyTwoWay<T>>> {
        self.get_or_create(name, default)?.create_link(owner, info)
    }

    /// Create a one-way prop of `name`.
    pub fn prop<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        owner: Option<Subscription<T>>,
        info: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<T>>> {
        self.typed::<T>(name)?.create_prop(owner, info)
    }

    /// Like [`prop`](Self::prop), creating `name` with `default` if missing.
    pub fn set_and_prop<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        default: T,
        owner: Option<Subscription<T>>,
        info: Option<&str>,
    ) -> Result<Rc<SyncedPropertyOneWay<T>>> {
        self.get_or_create(name, default)?.create_prop(owner, info)
    }

    /// Delete `name`. Refused while anything is still subscribed to it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let entry = self
            .entry(name)
            .ok_or_else(|| StateError::UnknownProperty(name.to_owned()))?;
        let count = entry.subscriber_count();
        if count > 0 {
            warn!(name, count, "LocalStorage: delete refused, property has subscribers");
            return Err(StateError::PropertyHasSubscribers {
                name: name.to_owned(),
                count,
            });
        }

        self.entries.borrow_mut().shift_remove(name);
        entry.teardown();
        debug!(name, "LocalStorage: deleted");
        Ok(())
    }

    /// Delete every property. Deletes nothing if any property is subscribed.
    pub fn clear(&self) -> Result<()> {
        let blocked = self
            .entries
            .borrow()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.subscriber_count()))
            .find(|(_, count)| *count > 0);
        if let Some((name, count)) = blocked {
            warn!(name = %name, count, "LocalStorage: clear refused");
            return Err(StateError::PropertyHasSubscribers { name, count });
        }

        self.teardown_all();
        Ok(())
    }

    /// Subscribe `subscriber` to changes of `name` with the multi-property
    /// capability. Returns `false` if `name` is missing.
    pub fn subscribe_to_changes_of<S>(&self, name: &str, subscriber: &Rc<S>) -> bool
    where
        S: MultiPropertySubscriber + 'static,
    {
        match self.entry(name) {
            Some(entry) => {
                SubscriberManager::ensure_registered(subscriber);
                let weak = Rc::downgrade(subscriber);
                let weak: Weak<dyn MultiPropertySubscriber> = weak;
                entry.subscribe_multi(subscriber.id(), weak);
                true
            }
            None => false,
        }
    }

    /// Undo [`subscribe_to_changes_of`](Self::subscribe_to_changes_of).
    pub fn unsubscribe_from_changes_of(&self, name: &str, subscriber: SubscriberId) -> bool {
        self.entry(name).is_some_and(|entry| entry.unlink(subscriber))
    }

    /// Number of subscribers of `name`, or `None` if it is missing.
    pub fn number_of_subscribers_to(&self, name: &str) -> Option<usize> {
        self.entry(name).map(|entry| entry.subscriber_count())
    }

    /// Tear down every property regardless of subscribers.
    pub fn about_to_be_deleted(&self) {
        self.teardown_all();
    }

    fn teardown_all(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        debug!(count = entries.len(), "LocalStorage: tearing down");
        for entry in entries.into_values() {
            entry.teardown();
        }
    }
}

thread_local! {
    static APP_STORAGE: RefCell<Option<Rc<LocalStorage>>> = const { RefCell::new(None) };
}

/// The per-thread application-wide storage.
pub struct AppStorage;

impl AppStorage {
    /// The application storage, created on first use.
    pub fn get_or_create() -> Rc<LocalStorage> {
        APP_STORAGE.with(|app| Rc::clone(app.borrow_mut().get_or_insert_with(|| Rc::new(LocalStorage::new()))))
    }

    /// Tear down and forget the application storage (test harness hook).
    pub fn reset() {
        let storage = APP_STORAGE.with(|app| app.borrow_mut().take());
        if let Some(storage) = storage {
            storage.about_to_be_deleted();
        }
    }
}
