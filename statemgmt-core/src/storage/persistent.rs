//! Persisted storage properties.
//!
//! [`PersistentStorage`] links to properties in a [`LocalStorage`] and
//! writes their value to a [`PersistenceBackend`] as JSON on every change.
//! On startup a persisted value takes precedence over the default.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::local::LocalStorage;
use crate::error::{Result, StateError};
use crate::state::{
    MultiPropertySubscriber, ObservedProperty, PropertySubscriber, SubscriberId, SubscriberManager,
    Subscription, SyncedPropertyTwoWay,
};

/// Key/value store for serialized property values.
pub trait PersistenceBackend {
    /// The stored JSON for `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store `json` under `key`.
    fn write(&self, key: &str, json: &str) -> Result<()>;

    /// Forget `key`.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Backend keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored JSON for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, json: &str) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_owned(), json.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Backend storing one `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| persistence_error(&dir, err))?;
        Ok(Self { dir })
    }

    /// The file for `key`. Keys that could leave `dir` are refused.
    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StateError::Persistence(format!("invalid key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

fn persistence_error(path: &Path, err: std::io::Error) -> StateError {
    StateError::Persistence(format!("{}: {err}", path.display()))
}

impl PersistenceBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(json)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(persistence_error(&path, err)),
        }
    }

    fn write(&self, key: &str, json: &str) -> Result<()> {
        let path = self.path(key)?;
        fs::write(&path, json).map_err(|err| persistence_error(&path, err))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence_error(&path, err)),
        }
    }
}

/// A link whose value can be serialized.
trait PersistedLink {
    fn to_json(&self) -> Result<String>;
    fn teardown(&self, owner: SubscriberId);
}

impl<T> PersistedLink for SyncedPropertyTwoWay<T>
where
    T: Clone + Serialize + 'static,
{
    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.get_untracked())?)
    }

    fn teardown(&self, owner: SubscriberId) {
        self.about_to_be_deleted(Some(owner));
    }
}

/// Storage properties mirrored to a persistence backend.
pub struct PersistentStorage {
    id: SubscriberId,
    this: Weak<PersistentStorage>,
    storage: Rc<LocalStorage>,
    backend: Rc<dyn PersistenceBackend>,
    links: RefCell<IndexMap<String, Rc<dyn PersistedLink>>>,
}

impl PersistentStorage {
    /// Create and register a persistent storage over `storage`.
    pub fn new(storage: Rc<LocalStorage>, backend: Rc<dyn PersistenceBackend>) -> Rc<Self> {
        let persistent = Rc::new_cyclic(|this| Self {
            id: SubscriberManager::make_id(),
            this: Weak::clone(this),
            storage,
            backend,
            links: RefCell::new(IndexMap::new()),
        });
        SubscriberManager::register(&persistent);
        persistent
    }

    /// Persist `name`. A value already in the backend wins over `default`
    /// and over the value currently in storage.
    pub fn persist_prop<T>(&self, name: &str, default: T) -> Result<()>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        if self.links.borrow().contains_key(name) {
            warn!(name, "PersistentStorage: already persisted");
            return Ok(());
        }

        match self.backend.read(name)? {
            Some(json) => {
                let stored: T = serde_json::from_str(&json)?;
                debug!(name, "PersistentStorage: restored from backend");
                self.storage.set_or_create(name, stored);
            }
            None => {
                if !self.storage.has(name) {
                    self.storage.set_or_create(name, default);
                }
            }
        }

        let owner: Weak<dyn MultiPropertySubscriber> = self.this.clone();
        let link = self
            .storage
            .link::<T>(name, Some(Subscription::from_multi(self.id, owner)), Some(name))?;
        self.backend.write(name, &link.to_json()?)?;
        self.links.borrow_mut().insert(name.to_owned(), link);
        Ok(())
    }

    /// Stop persisting `name` and remove it from the backend.
    pub fn delete_prop(&self, name: &str) -> Result<()> {
        let link = self.links.borrow_mut().shift_remove(name);
        if let Some(link) = link {
            link.teardown(self.id);
        }
        self.backend.remove(name)
    }

    /// Persisted names in the order they were added.
    pub fn keys(&self) -> Vec<String> {
        self.links.borrow().keys().cloned().collect()
    }

    /// Write every persisted value to the backend.
    pub fn write_all(&self) -> Result<()> {
        let links: Vec<_> = self
            .links
            .borrow()
            .iter()
            .map(|(name, link)| (name.clone(), Rc::clone(link)))
            .collect();
        for (name, link) in links {
            self.backend.write(&name, &link.to_json()?)?;
        }
        Ok(())
    }

    fn write(&self, name: &str) {
        let link = self.links.borrow().get(name).cloned();
        let Some(link) = link else {
            return;
        };
        match link.to_json().and_then(|json| self.backend.write(name, &json)) {
            Ok(()) => debug!(name, "PersistentStorage: written"),
            Err(err) => error!(name, %err, "PersistentStorage: write failed"),
        }
    }
}

impl PropertySubscriber for PersistentStorage {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
        let links = std::mem::take(&mut *self.links.borrow_mut());
        for link in links.into_values() {
            link.teardown(self.id);
        }
        SubscriberManager::delete(self.id);
    }
}

impl Drop for PersistentStorage {
    fn drop(&mut self) {
        SubscriberManager::forget(self.id);
    }
}

impl MultiPropertySubscriber for PersistentStorage {
    fn property_has_changed(&self, info: Option<&str>) {
        match info {
            Some(name) => self.write(name),
            None => {
                if let Err(err) = self.write_all() {
                    error!(%err, "PersistentStorage: write failed");
                }
            }
        }
    }
}
