//! Shared Storage
//!
//! Name-keyed state that lives outside any single view: plain local and
//! application storage, host environment values, and persisted values.

mod environment;
mod local;
mod persistent;

pub use environment::{EnvChangeCallback, EnvKey, EnvValue, Environment, EnvironmentBackend, InMemoryEnvironment};
pub use local::{AppStorage, LocalStorage};
pub use persistent::{FileBackend, MemoryBackend, PersistenceBackend, PersistentStorage};
