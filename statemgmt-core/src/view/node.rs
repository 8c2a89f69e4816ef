//! View Node
//!
//! A view owns the properties it declares, subscribes to them with the
//! multi-property capability and schedules itself for re-render when one of
//! them changes. Views form a tree; children share the parent's scheduler
//! and storage and can consume what an ancestor provides.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use super::scheduler::RenderScheduler;
use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::state::{
    MultiPropertySubscriber, ObservedProperty, ObservedPropertyObject, ObservedPropertySimple, PropertySubscriber,
    RenderContext, SubscriberId, SubscriberManager, Subscription, SyncedPropertyOneWay, SyncedPropertyTwoWay,
};
use crate::storage::LocalStorage;

type RenderFn = Rc<dyn Fn(&View)>;
type WatchFn = Rc<dyn Fn(&str)>;

/// A node in the view tree.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Rc::new(RenderScheduler::new());
/// let view = View::new("Counter", Rc::clone(&scheduler));
/// let count = view.declare_state("count", 0);
///
/// view.set_render({
///     let count = count.clone();
///     move |_| println!("count = {}", count.get())
/// });
///
/// scheduler.tick();   // first render
/// count.set(1);       // marks the view dirty
/// scheduler.tick();   // re-render
/// ```
pub struct View {
    id: SubscriberId,
    name: String,
    this: Weak<View>,
    parent: Weak<View>,
    children: RefCell<Vec<Rc<View>>>,

    /// Properties declared by this view; torn down with it.
    owned: RefCell<Vec<Rc<dyn PropertySubscriber>>>,

    /// Properties of other owners this view subscribed to while rendering.
    sources: RefCell<IndexSet<SubscriberId>>,

    /// Property names read during the last render.
    used_for_render: RefCell<IndexSet<String>>,

    rendering: Cell<bool>,
    has_rendered: Cell<bool>,
    needs_update: Cell<bool>,
    deleted: Cell<bool>,
    render_count: Cell<usize>,

    watches: RefCell<HashMap<String, Vec<WatchFn>>>,
    provided: RefCell<HashMap<String, Rc<dyn Any>>>,
    render_fn: RefCell<Option<RenderFn>>,
    scheduler: Rc<RenderScheduler>,
    storage: RefCell<Option<Rc<LocalStorage>>>,
}

impl View {
    /// Create a root view. It is scheduled for its first render.
    pub fn new(name: &str, scheduler: Rc<RenderScheduler>) -> Rc<Self> {
        Self::build(name, Weak::new(), scheduler, None)
    }

    /// Create a root view bound to `storage`.
    pub fn with_storage(name: &str, scheduler: Rc<RenderScheduler>, storage: Rc<LocalStorage>) -> Rc<Self> {
        Self::build(name, Weak::new(), scheduler, Some(storage))
    }

    /// Create a child of `parent`, sharing its scheduler and storage.
    pub fn new_child(parent: &Rc<View>, name: &str) -> Rc<Self> {
        let storage = parent.storage.borrow().clone();
        let child = Self::build(name, Rc::downgrade(parent), Rc::clone(&parent.scheduler), storage);
        parent.children.borrow_mut().push(Rc::clone(&child));
        child
    }

    fn build(
        name: &str,
        parent: Weak<View>,
        scheduler: Rc<RenderScheduler>,
        storage: Option<Rc<LocalStorage>>,
    ) -> Rc<Self> {
        let view = Rc::new_cyclic(|this| Self {
            id: SubscriberManager::make_id(),
            name: name.to_owned(),
            this: Weak::clone(this),
            parent,
            children: RefCell::new(Vec::new()),
            owned: RefCell::new(Vec::new()),
            sources: RefCell::new(IndexSet::new()),
            used_for_render: RefCell::new(IndexSet::new()),
            rendering: Cell::new(false),
            has_rendered: Cell::new(false),
            needs_update: Cell::new(false),
            deleted: Cell::new(false),
            render_count: Cell::new(0),
            watches: RefCell::new(HashMap::new()),
            provided: RefCell::new(HashMap::new()),
            render_fn: RefCell::new(None),
            scheduler,
            storage: RefCell::new(storage),
        });
        SubscriberManager::register(&view);
        debug!(id = %view.id, name = %view.name, "View: created");
        view.mark_need_update();
        view
    }

    /// Name given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent view, if it is still alive.
    pub fn parent(&self) -> Option<Rc<View>> {
        self.parent.upgrade()
    }

    /// Direct children.
    pub fn children(&self) -> Vec<Rc<View>> {
        self.children.borrow().clone()
    }

    /// Find a descendant by identity.
    ///
    /// Returns `None` when the id is not in the subtree, and also when a
    /// child list is being mutated during the lookup.
    pub fn find_child_by_id(&self, id: SubscriberId) -> Option<Rc<View>> {
        let children = self.children.try_borrow().ok()?;
        for child in children.iter() {
            if child.id == id {
                return Some(Rc::clone(child));
            }
            if let Some(found) = child.find_child_by_id(id) {
                return Some(found);
            }
        }
        None
    }

    /// Detach and tear down the direct child `id`.
    pub fn remove_child(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut children = self.children.borrow_mut();
            children
                .iter()
                .position(|child| child.id == id)
                .map(|index| children.remove(index))
        };
        match removed {
            Some(child) => {
                child.about_to_be_deleted(Some(self.id));
                true
            }
            None => false,
        }
    }

    fn owner<V: 'static>(&self) -> Subscription<V> {
        let view: Weak<dyn MultiPropertySubscriber> = self.this.clone();
        Subscription::from_multi(self.id, view)
    }

    /// Take ownership of a property: it is torn down with this view.
    pub fn own<P>(&self, property: &Rc<P>)
    where
        P: PropertySubscriber + 'static,
    {
        let erased: Rc<dyn PropertySubscriber> = property.clone();
        self.owned.borrow_mut().push(erased);
    }

    /// Declare scalar state owned by this view.
    pub fn declare_state<T>(&self, name: &str, value: T) -> Rc<ObservedPropertySimple<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        let property = ObservedPropertySimple::new(value, Some(self.owner()), Some(name));
        self.own(&property);
        property
    }

    /// Declare object state owned by this view.
    pub fn declare_object<T: 'static>(&self, name: &str, value: Rc<T>) -> Rc<ObservedPropertyObject<T>> {
        let property = ObservedPropertyObject::new(value, Some(self.owner()), Some(name));
        self.own(&property);
        property
    }

    /// Declare a two-way link to `source`.
    pub fn declare_link<V, P>(&self, name: &str, source: Rc<P>) -> Result<Rc<SyncedPropertyTwoWay<V>>>
    where
        V: Clone + 'static,
        P: ObservedProperty<V> + ?Sized,
    {
        let link = source.create_link(Some(self.owner()), Some(name))?;
        self.own(&link);
        Ok(link)
    }

    /// Declare a one-way prop of `source`.
    pub fn declare_prop<V, P>(&self, name: &str, source: Rc<P>) -> Result<Rc<SyncedPropertyOneWay<V>>>
    where
        V: Clone + 'static,
        P: ObservedProperty<V> + ?Sized,
    {
        let prop = source.create_prop(Some(self.owner()), Some(name))?;
        self.own(&prop);
        Ok(prop)
    }

    /// Declare a two-way link to the storage property `key`.
    pub fn declare_storage_link<T>(&self, name: &str, key: &str) -> Result<Rc<SyncedPropertyTwoWay<T>>>
    where
        T: Clone + PartialEq + 'static,
    {
        let link = self.local_storage().link::<T>(key, Some(self.owner()), Some(name))?;
        self.own(&link);
        Ok(link)
    }

    /// Declare a one-way prop of the storage property `key`.
    pub fn declare_storage_prop<T>(&self, name: &str, key: &str) -> Result<Rc<SyncedPropertyOneWay<T>>>
    where
        T: Clone + PartialEq + 'static,
    {
        let prop = self.local_storage().prop::<T>(key, Some(self.owner()), Some(name))?;
        self.own(&prop);
        Ok(prop)
    }

    /// The storage this view links to. Inherited from the parent; a root
    /// view without storage gets a fresh one.
    pub fn local_storage(&self) -> Rc<LocalStorage> {
        if let Some(storage) = self.storage.borrow().as_ref() {
            return Rc::clone(storage);
        }

        let storage = match self.parent.upgrade() {
            Some(parent) => parent.local_storage(),
            None => {
                if StateConfig::current().warn_on_default_storage {
                    warn!(id = %self.id, name = %self.name, "View: no storage given, creating a default one");
                }
                Rc::new(LocalStorage::new())
            }
        };
        *self.storage.borrow_mut() = Some(Rc::clone(&storage));
        storage
    }

    /// Run `callback` whenever the property named `name` changes.
    pub fn declare_watch<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str) + 'static,
    {
        self.watches
            .borrow_mut()
            .entry(name.to_owned())
            .or_default()
            .push(Rc::new(callback));
    }

    /// Make `property` available to descendants under `name`.
    pub fn add_provided_var<V, P>(&self, name: &str, property: &Rc<P>) -> Result<()>
    where
        V: Clone + 'static,
        P: ObservedProperty<V> + 'static,
    {
        let mut provided = self.provided.borrow_mut();
        if provided.contains_key(name) {
            return Err(StateError::DuplicateProvide(name.to_owned()));
        }
        let erased: Rc<dyn ObservedProperty<V>> = property.clone();
        provided.insert(name.to_owned(), Rc::new(erased));
        debug!(id = %self.id, name, "View: provided");
        Ok(())
    }

    fn find_provided(&self, name: &str) -> Option<Rc<dyn Any>> {
        let own = self.provided.borrow().get(name).cloned();
        own.or_else(|| self.parent.upgrade().and_then(|parent| parent.find_provided(name)))
    }

    /// Link `var_name` to what this view or an ancestor provides as `provide_name`.
    pub fn initialize_consume<V>(&self, provide_name: &str, var_name: &str) -> Result<Rc<SyncedPropertyTwoWay<V>>>
    where
        V: Clone + 'static,
    {
        let provided = self
            .find_provided(provide_name)
            .ok_or_else(|| StateError::MissingProvide(provide_name.to_owned()))?;
        let source = provided
            .downcast_ref::<Rc<dyn ObservedProperty<V>>>()
            .cloned()
            .ok_or_else(|| StateError::PropertyTypeMismatch {
                name: provide_name.to_owned(),
                expected: type_name::<V>(),
            })?;
        self.declare_link(var_name, source)
    }

    /// Set the function run on every render.
    pub fn set_render<F>(&self, render: F)
    where
        F: Fn(&View) + 'static,
    {
        *self.render_fn.borrow_mut() = Some(Rc::new(render));
    }

    /// Render now, tracking which properties are read.
    pub fn rerender(&self) {
        if self.deleted.get() {
            warn!(id = %self.id, name = %self.name, "View: rerender after teardown ignored");
            return;
        }
        self.needs_update.set(false);
        self.about_to_render();

        let render = self.render_fn.borrow().clone();
        let dependencies = {
            let view: Weak<dyn MultiPropertySubscriber> = self.this.clone();
            let _context = RenderContext::enter(self.id, view);
            if let Some(render) = render {
                render(self);
            }
            RenderContext::get_dependencies()
        };

        self.record_sources(dependencies);
        self.on_render_done();
    }

    /// Start a render pass: forget what the previous one read.
    pub fn about_to_render(&self) {
        self.used_for_render.borrow_mut().clear();
        self.rendering.set(true);
    }

    /// Finish a render pass.
    pub fn on_render_done(&self) {
        self.rendering.set(false);
        self.has_rendered.set(true);
        self.render_count.set(self.render_count.get() + 1);
        debug!(id = %self.id, name = %self.name, used = ?self.used_for_render.borrow(),
            "View: rendered");
    }

    fn record_sources(&self, dependencies: Vec<SubscriberId>) {
        let owned: IndexSet<SubscriberId> = self.owned.borrow().iter().map(|property| property.id()).collect();
        let mut sources = self.sources.borrow_mut();
        for dependency in dependencies {
            if !owned.contains(&dependency) && sources.insert(dependency) {
                trace!(id = %self.id, source = %dependency, "View: new render dependency");
            }
        }
    }

    /// Property names read during the last render.
    pub fn properties_needed_to_render(&self) -> Vec<String> {
        self.used_for_render.borrow().iter().cloned().collect()
    }

    /// Schedule a re-render. Repeated calls before the next tick are coalesced.
    pub fn mark_need_update(&self) {
        if self.deleted.get() || self.needs_update.replace(true) {
            return;
        }
        self.scheduler.schedule(self.id, Weak::clone(&self.this));
    }

    pub(crate) fn clear_needs_update(&self) {
        self.needs_update.set(false);
    }

    /// Whether a re-render is pending.
    pub fn needs_update(&self) -> bool {
        self.needs_update.get()
    }

    /// Number of completed renders.
    pub fn render_count(&self) -> usize {
        self.render_count.get()
    }

    /// Whether the view has been torn down.
    pub fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    fn fire_watches(&self, name: &str) {
        let callbacks = self.watches.borrow().get(name).cloned().unwrap_or_default();
        for callback in callbacks {
            callback(name);
        }
    }
}

impl PropertySubscriber for View {
    fn id(&self) -> SubscriberId {
        self.id
    }

    /// Tear down children first, then detach from foreign sources, then
    /// delete the owned properties, then leave the scheduler and registry.
    fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
        if self.deleted.replace(true) {
            return;
        }
        debug!(id = %self.id, name = %self.name, "View: aboutToBeDeleted");

        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.about_to_be_deleted(Some(self.id));
        }

        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        for source in sources {
            match SubscriberManager::get(source) {
                Ok(source) => {
                    source.unlink_subscriber(self.id);
                }
                Err(err) => trace!(id = %self.id, %err, "View: source already gone"),
            }
        }

        let owned = std::mem::take(&mut *self.owned.borrow_mut());
        for property in owned {
            property.about_to_be_deleted(Some(self.id));
        }

        self.watches.borrow_mut().clear();
        self.provided.borrow_mut().clear();
        self.render_fn.borrow_mut().take();
        self.scheduler.cancel(self.id);
        SubscriberManager::delete(self.id);
    }

    fn info(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl Drop for View {
    fn drop(&mut self) {
        SubscriberManager::forget(self.id);
    }
}

impl MultiPropertySubscriber for View {
    fn property_has_changed(&self, info: Option<&str>) {
        if self.deleted.get() {
            return;
        }

        let used = !self.has_rendered.get()
            || info.map_or(true, |name| self.used_for_render.borrow().contains(name));
        if used {
            trace!(id = %self.id, name = %self.name, property = ?info, "View: dependency changed");
            self.mark_need_update();
        } else {
            trace!(id = %self.id, name = %self.name, property = ?info,
                "View: changed property not used for render - skipping update");
        }

        if let Some(name) = info {
            self.fire_watches(name);
        }
    }

    fn property_read(&self, info: Option<&str>) {
        if !self.rendering.get() {
            return;
        }
        if let Some(name) = info {
            self.used_for_render.borrow_mut().insert(name.to_owned());
        }
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("children", &self.children.borrow().len())
            .field("owned", &self.owned.borrow().len())
            .field("needs_update", &self.needs_update.get())
            .field("deleted", &self.deleted.get())
            .finish()
    }
}
