//! Host environment properties.
//!
//! The host (accessibility, color mode, font scale, layout direction,
//! language) is reached through an [`EnvironmentBackend`]. [`Environment`]
//! copies selected values into a [`LocalStorage`] and writes every change
//! the backend reports through the ordinary `set` path, so views that link
//! or prop to these names are marked dirty like for any other write.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::local::LocalStorage;

/// A value reported by the host environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// A flag such as `accessibilityEnabled`.
    Bool(bool),
    /// An enumerated setting such as `colorMode` or `layoutDirection`.
    Int(i64),
    /// A scale factor such as `fontScale`.
    Float(f64),
    /// Free text such as `languageCode`.
    Text(String),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Bool(value) => write!(f, "{value}"),
            EnvValue::Int(value) => write!(f, "{value}"),
            EnvValue::Float(value) => write!(f, "{value}"),
            EnvValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        EnvValue::Bool(value)
    }
}

impl From<i64> for EnvValue {
    fn from(value: i64) -> Self {
        EnvValue::Int(value)
    }
}

impl From<f64> for EnvValue {
    fn from(value: f64) -> Self {
        EnvValue::Float(value)
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Text(value.to_owned())
    }
}

/// Well-known environment keys.
pub struct EnvKey;

impl EnvKey {
    /// Whether a screen reader or similar service is active.
    pub const ACCESSIBILITY_ENABLED: &'static str = "accessibilityEnabled";
    /// Host color mode (light or dark), as an integer code.
    pub const COLOR_MODE: &'static str = "colorMode";
    /// Font size multiplier.
    pub const FONT_SCALE: &'static str = "fontScale";
    /// Font weight multiplier, rounded to two decimals.
    pub const FONT_WEIGHT_SCALE: &'static str = "fontWeightScale";
    /// Layout direction (left-to-right or right-to-left), as an integer code.
    pub const LAYOUT_DIRECTION: &'static str = "layoutDirection";
    /// Current language, e.g. `"en"`.
    pub const LANGUAGE_CODE: &'static str = "languageCode";

    /// All well-known keys.
    pub const ALL: [&'static str; 6] = [
        Self::ACCESSIBILITY_ENABLED,
        Self::COLOR_MODE,
        Self::FONT_SCALE,
        Self::FONT_WEIGHT_SCALE,
        Self::LAYOUT_DIRECTION,
        Self::LANGUAGE_CODE,
    ];
}

/// Callback receiving `(key, new_value)` for host configuration changes.
pub type EnvChangeCallback = Box<dyn Fn(&str, EnvValue)>;

/// Host configuration reads plus a change notification hook.
pub trait EnvironmentBackend {
    /// Value of [`EnvKey::ACCESSIBILITY_ENABLED`].
    fn accessibility_enabled(&self) -> bool;

    /// Value of [`EnvKey::COLOR_MODE`].
    fn color_mode(&self) -> i64;

    /// Value of [`EnvKey::FONT_SCALE`].
    fn font_scale(&self) -> f64;

    /// Unrounded value of [`EnvKey::FONT_WEIGHT_SCALE`].
    fn font_weight_scale(&self) -> f64;

    /// Value of [`EnvKey::LAYOUT_DIRECTION`].
    fn layout_direction(&self) -> i64;

    /// Value of [`EnvKey::LANGUAGE_CODE`].
    fn language_code(&self) -> String;

    /// Register the callback the host invokes when a value changes.
    fn on_value_changed(&self, callback: EnvChangeCallback);

    /// The current value of a well-known key.
    fn value_of(&self, key: &str) -> Option<EnvValue> {
        let value = match key {
            EnvKey::ACCESSIBILITY_ENABLED => EnvValue::Bool(self.accessibility_enabled()),
            EnvKey::COLOR_MODE => EnvValue::Int(self.color_mode()),
            EnvKey::FONT_SCALE => EnvValue::Float(self.font_scale()),
            EnvKey::FONT_WEIGHT_SCALE => EnvValue::Float(round2(self.font_weight_scale())),
            EnvKey::LAYOUT_DIRECTION => EnvValue::Int(self.layout_direction()),
            EnvKey::LANGUAGE_CODE => EnvValue::Text(self.language_code()),
            _ => return None,
        };
        Some(value)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// In-memory backend for tests and headless hosts.
pub struct InMemoryEnvironment {
    values: RefCell<HashMap<String, EnvValue>>,
    callbacks: RefCell<Vec<Rc<dyn Fn(&str, EnvValue)>>>,
}

impl InMemoryEnvironment {
    /// A backend with light color mode, unit font scales and left-to-right English.
    pub fn new() -> Self {
        let values = [
            (EnvKey::ACCESSIBILITY_ENABLED, EnvValue::Bool(false)),
            (EnvKey::COLOR_MODE, EnvValue::Int(0)),
            (EnvKey::FONT_SCALE, EnvValue::Float(1.0)),
            (EnvKey::FONT_WEIGHT_SCALE, EnvValue::Float(1.0)),
            (EnvKey::LAYOUT_DIRECTION, EnvValue::Int(0)),
            (EnvKey::LANGUAGE_CODE, EnvValue::Text("en".to_owned())),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();

        Self {
            values: RefCell::new(values),
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Builder-style initial value.
    pub fn with_value(self, key: &str, value: impl Into<EnvValue>) -> Self {
        self.values.borrow_mut().insert(key.to_owned(), value.into());
        self
    }

    /// Store a new value and report it to every registered callback.
    pub fn simulate_change(&self, key: &str, value: impl Into<EnvValue>) {
        let value = value.into();
        self.values.borrow_mut().insert(key.to_owned(), value.clone());

        let callbacks = self.callbacks.borrow().clone();
        debug!(key, %value, callbacks = callbacks.len(), "InMemoryEnvironment: simulated change");
        for callback in callbacks {
            callback(key, value.clone());
        }
    }

    fn bool_of(&self, key: &str) -> bool {
        matches!(self.values.borrow().get(key), Some(EnvValue::Bool(true)))
    }

    fn int_of(&self, key: &str) -> i64 {
        match self.values.borrow().get(key) {
            Some(EnvValue::Int(value)) => *value,
            _ => 0,
        }
    }

    fn float_of(&self, key: &str) -> f64 {
        match self.values.borrow().get(key) {
            Some(EnvValue::Float(value)) => *value,
            Some(EnvValue::Int(value)) => *value as f64,
            _ => 1.0,
        }
    }
}

impl Default for InMemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentBackend for InMemoryEnvironment {
    fn accessibility_enabled(&self) -> bool {
        self.bool_of(EnvKey::ACCESSIBILITY_ENABLED)
    }

    fn color_mode(&self) -> i64 {
        self.int_of(EnvKey::COLOR_MODE)
    }

    fn font_scale(&self) -> f64 {
        self.float_of(EnvKey::FONT_SCALE)
    }

    fn font_weight_scale(&self) -> f64 {
        self.float_of(EnvKey::FONT_WEIGHT_SCALE)
    }

    fn layout_direction(&self) -> i64 {
        self.int_of(EnvKey::LAYOUT_DIRECTION)
    }

    fn language_code(&self) -> String {
        match self.values.borrow().get(EnvKey::LANGUAGE_CODE) {
            Some(EnvValue::Text(code)) => code.clone(),
            _ => String::new(),
        }
    }

    fn on_value_changed(&self, callback: EnvChangeCallback) {
        self.callbacks.borrow_mut().push(Rc::from(callback));
    }
}

/// Environment values exposed as storage properties.
///
/// # Example
///
/// ```rust,ignore
/// let env = Environment::new(backend, AppStorage::get_or_create());
/// env.env_prop(EnvKey::COLOR_MODE, 0_i64);
///
/// let mode = view.declare_storage_prop::<EnvValue>("colorMode", "colorMode")?;
/// ```
pub struct Environment {
    backend: Rc<dyn EnvironmentBackend>,
    storage: Rc<LocalStorage>,
    keys: RefCell<Vec<String>>,
}

impl Environment {
    /// Bind `backend` to `storage` and start forwarding change events.
    pub fn new(backend: Rc<dyn EnvironmentBackend>, storage: Rc<LocalStorage>) -> Rc<Self> {
        let environment = Rc::new(Self {
            backend: Rc::clone(&backend),
            storage,
            keys: RefCell::new(Vec::new()),
        });

        let weak: Weak<Self> = Rc::downgrade(&environment);
        backend.on_value_changed(Box::new(move |key, value| {
            if let Some(environment) = weak.upgrade() {
                environment.value_changed(key, value);
            }
        }));
        environment
    }

    fn value_changed(&self, key: &str, value: EnvValue) {
        if !self.keys.borrow().iter().any(|known| known == key) {
            debug!(key, "Environment: change for a key without env prop - ignoring");
            return;
        }
        let value = match (key, value) {
            (EnvKey::FONT_WEIGHT_SCALE, EnvValue::Float(scale)) => EnvValue::Float(round2(scale)),
            (_, value) => value,
        };
        debug!(key, %value, "Environment: value changed");
        self.storage.set(key, value);
    }

    /// Create a storage property for `key`, initialized from the backend
    /// for well-known keys and from `default` otherwise. Returns `false`
    /// if storage already holds `key`.
    pub fn env_prop(&self, key: &str, default: impl Into<EnvValue>) -> bool {
        if self.storage.has(key) {
            warn!(key, "Environment: env_prop refused, key already in storage");
            return false;
        }
        let value = self.backend.value_of(key).unwrap_or_else(|| default.into());
        debug!(key, %value, "Environment: env_prop");
        self.storage.set_or_create(key, value);
        self.keys.borrow_mut().push(key.to_owned());
        true
    }

    /// [`env_prop`](Self::env_prop) for several keys.
    pub fn env_props<I, V>(&self, props: I) -> Vec<bool>
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<EnvValue>,
    {
        props
            .into_iter()
            .map(|(key, default)| self.env_prop(key, default))
            .collect()
    }

    /// Keys created through [`env_prop`](Self::env_prop).
    pub fn keys(&self) -> Vec<String> {
        self.keys.borrow().clone()
    }

    /// Delete the env props from storage. Props still in use stay.
    pub fn about_to_be_deleted(&self) {
        let keys = std::mem::take(&mut *self.keys.borrow_mut());
        for key in keys {
            if let Err(err) = self.storage.delete(&key) {
                warn!(key = %key, %err, "Environment: env prop kept");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ObservedProperty, SubscriberManager};

    #[test]
    fn simulated_change_reaches_callback_once() {
        let backend = InMemoryEnvironment::new().with_value(EnvKey::COLOR_MODE, 1_i64);
        assert_eq!(backend.color_mode(), 1);

        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        backend.on_value_changed(Box::new(move |key, value| {
            sink.borrow_mut().push((key.to_owned(), value));
        }));

        backend.simulate_change(EnvKey::COLOR_MODE, 0_i64);
        assert_eq!(*calls.borrow(), vec![("colorMode".to_string(), EnvValue::Int(0))]);
        assert_eq!(backend.color_mode(), 0);
    }

    #[test]
    fn env_prop_seeds_from_backend() {
        SubscriberManager::reset();
        let backend = Rc::new(
            InMemoryEnvironment::new()
                .with_value(EnvKey::LANGUAGE_CODE, "de")
                .with_value(EnvKey::FONT_WEIGHT_SCALE, 1.23456),
        );
        let storage = Rc::new(LocalStorage::new());
        let env = Environment::new(backend, Rc::clone(&storage));

        assert!(env.env_prop(EnvKey::LANGUAGE_CODE, "en"));
        assert!(env.env_prop(EnvKey::FONT_WEIGHT_SCALE, 1.0));
        assert!(env.env_prop("customKey", 7_i64));
        assert!(!env.env_prop(EnvKey::LANGUAGE_CODE, "fr"));

        assert_eq!(storage.get::<EnvValue>("languageCode"), Some(EnvValue::Text("de".into())));
        assert_eq!(storage.get::<EnvValue>("fontWeightScale"), Some(EnvValue::Float(1.23)));
        assert_eq!(storage.get::<EnvValue>("customKey"), Some(EnvValue::Int(7)));
        assert_eq!(env.keys(), vec!["languageCode", "fontWeightScale", "customKey"]);
    }

    #[test]
    fn backend_changes_flow_into_storage() {
        SubscriberManager::reset();
        let backend = Rc::new(InMemoryEnvironment::new());
        let storage = Rc::new(LocalStorage::new());
        let env = Environment::new(backend.clone(), Rc::clone(&storage));
        env.env_props([(EnvKey::COLOR_MODE, 0_i64), (EnvKey::LAYOUT_DIRECTION, 0_i64)]);

        let prop = storage.prop::<EnvValue>("colorMode", None, None).unwrap();
        backend.simulate_change(EnvKey::COLOR_MODE, 1_i64);
        backend.simulate_change("unrelated", true);

        assert_eq!(prop.get(), EnvValue::Int(1));
        assert!(!storage.has("unrelated"));
    }

    #[test]
    fn teardown_keeps_props_in_use() {
        SubscriberManager::reset();
        let backend = Rc::new(InMemoryEnvironment::new());
        let storage = Rc::new(LocalStorage::new());
        let env = Environment::new(backend, Rc::clone(&storage));
        env.env_props([(EnvKey::COLOR_MODE, 0_i64), (EnvKey::FONT_SCALE, 1_i64)]);
        let _link = storage.link::<EnvValue>("fontScale", None, None).unwrap();

        env.about_to_be_deleted();
        assert!(!storage.has("colorMode"));
        assert!(storage.has("fontScale"));
        assert!(env.keys().is_empty());
    }

    #[test]
    fn dropped_environment_ignores_events() {
        SubscriberManager::reset();
        let backend = Rc::new(InMemoryEnvironment::new());
        let storage = Rc::new(LocalStorage::new());
        let env = Environment::new(backend.clone(), Rc::clone(&storage));
        env.env_prop(EnvKey::COLOR_MODE, 0_i64);
        drop(env);

        backend.simulate_change(EnvKey::COLOR_MODE, 1_i64);
        assert_eq!(storage.get::<EnvValue>("colorMode"), Some(EnvValue::Int(0)));
    }

    #[test]
    fn env_value_json_is_untagged() {
        let values: Vec<EnvValue> = serde_json::from_str(r#"[true, 2, 1.5, "ltr"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                EnvValue::Bool(true),
                EnvValue::Int(2),
                EnvValue::Float(1.5),
                EnvValue::Text("ltr".into())
            ]
        );
    }
}
