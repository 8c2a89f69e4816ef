//! Subscriber Registry
//!
//! The registry maps subscriber identities to subscribers. Properties keep
//! identities, not pointers, for cross references they do not own; the
//! registry resolves them on demand.
//!
//! # Threading
//!
//! The observation graph lives on one UI thread. The registry is therefore
//! thread-local state with an explicit lifecycle: it starts empty, entries
//! come and go with their subscribers, and only test harnesses reset it.
//!
//! Entries are weak. Registration never extends a subscriber's lifetime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::subscriber::{PropertySubscriber, SubscriberId};
use crate::error::{report_violation, Result, StateError};

thread_local! {
    static SUBSCRIBERS: RefCell<HashMap<SubscriberId, Weak<dyn PropertySubscriber>>> =
        RefCell::new(HashMap::new());
}

/// The subscriber registry of the current thread.
pub struct SubscriberManager;

impl SubscriberManager {
    /// Allocate a fresh identity.
    pub fn make_id() -> SubscriberId {
        SubscriberId::new()
    }

    /// Whether `id` is registered.
    pub fn has(id: SubscriberId) -> bool {
        SUBSCRIBERS.with(|subscribers| subscribers.borrow().contains_key(&id))
    }

    /// Resolve `id` to its subscriber.
    ///
    /// Fails with [`StateError::NotFound`] if the identity is not registered
    /// or its subscriber has already been dropped.
    pub fn get(id: SubscriberId) -> Result<Rc<dyn PropertySubscriber>> {
        let weak = SUBSCRIBERS.with(|subscribers| subscribers.borrow().get(&id).cloned());
        weak.and_then(|weak| weak.upgrade())
            .ok_or(StateError::NotFound(id))
    }

    /// Register `subscriber` under its own identity.
    pub fn add<S>(subscriber: &Rc<S>) -> Result<()>
    where
        S: PropertySubscriber + 'static,
    {
        let weak = Rc::downgrade(subscriber);
        let weak: Weak<dyn PropertySubscriber> = weak;
        Self::add_weak(subscriber.id(), weak)
    }

    fn add_weak(id: SubscriberId, subscriber: Weak<dyn PropertySubscriber>) -> Result<()> {
        SUBSCRIBERS.with(|subscribers| {
            let mut subscribers = subscribers.borrow_mut();
            if subscribers.contains_key(&id) {
                return Err(StateError::DuplicateId(id));
            }
            subscribers.insert(id, subscriber);
            Ok(())
        })
    }

    /// Register a freshly created subscriber, reporting collisions as
    /// invariant violations.
    pub(crate) fn register<S>(subscriber: &Rc<S>)
    where
        S: PropertySubscriber + 'static,
    {
        if let Err(err) = Self::add(subscriber) {
            report_violation(err);
        }
    }

    /// Register `subscriber` unless its identity is already present.
    pub(crate) fn ensure_registered<S>(subscriber: &Rc<S>)
    where
        S: PropertySubscriber + 'static,
    {
        let id = subscriber.id();
        SUBSCRIBERS.with(|subscribers| {
            subscribers.borrow_mut().entry(id).or_insert_with(|| {
                trace!(%id, "SubscriberManager: registering on subscribe");
                Rc::downgrade(subscriber) as Weak<dyn PropertySubscriber>
            });
        });
    }

    /// Remove `id`. Returns whether an entry existed.
    pub fn delete(id: SubscriberId) -> bool {
        SUBSCRIBERS.with(|subscribers| subscribers.borrow_mut().remove(&id).is_some())
    }

    /// Remove `id` from a `Drop` impl. Does nothing once the thread-local
    /// registry has been destroyed or while it is borrowed.
    pub(crate) fn forget(id: SubscriberId) {
        let _ = SUBSCRIBERS.try_with(|subscribers| {
            if let Ok(mut subscribers) = subscribers.try_borrow_mut() {
                subscribers.remove(&id);
            }
        });
    }

    /// Number of registered subscribers.
    pub fn len() -> usize {
        SUBSCRIBERS.with(|subscribers| subscribers.borrow().len())
    }

    /// Whether the registry is empty.
    pub fn is_empty() -> bool {
        Self::len() == 0
    }

    /// Log every registered subscriber at debug level.
    pub fn dump() {
        let entries: Vec<(SubscriberId, Weak<dyn PropertySubscriber>)> = SUBSCRIBERS.with(|subscribers| {
            subscribers
                .borrow()
                .iter()
                .map(|(id, weak)| (*id, Weak::clone(weak)))
                .collect()
        });

        debug!(count = entries.len(), "SubscriberManager dump (start)");
        for (id, weak) in entries {
            match weak.upgrade() {
                Some(subscriber) => {
                    let info = subscriber.info().unwrap_or_else(|| "unknown".to_string());
                    debug!(%id, %info, "registered subscriber");
                }
                None => warn!(%id, "registered subscriber was dropped without teardown"),
            }
        }
        debug!("SubscriberManager dump (end)");
    }

    /// Drop every entry. For test isolation only.
    pub fn reset() {
        SUBSCRIBERS.with(|subscribers| subscribers.borrow_mut().clear());
    }
}
