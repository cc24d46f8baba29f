//! Durable storage of [`Account`] records.
//!
//! A storage adapter maps the primary domain name of an account to its
//! serialized record. Adapters are created by name through a
//! [`BackendRegistry`] built by the embedding application.

mod fs;
mod memory;
mod null;

pub use self::fs::FsStorage;
pub use self::memory::MemoryStorage;
pub use self::null::NullStorage;

use crate::account::Account;
use crate::error::*;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the backend used when none is configured.
pub const DEFAULT_BACKEND: &str = "fs";

/// Environment variable naming the directory of the `fs` backend.
pub const STORAGE_DIR_ENV: &str = "STORAGE_DIR";

#[async_trait]
pub trait StorageAdapter: Send + Sync {
  /// Load the account stored under `domain`, or `None` if there is none.
  async fn load_account(
    &self,
    domain: &str,
  ) -> Result<Option<Account>, StorageError>;

  /// Store `account` under its primary domain name, replacing any previous
  /// record.
  async fn save_account(&self, account: &Account) -> Result<(), StorageError>;

  /// The display name of this backend.
  fn name(&self) -> &str;
}

type Factory =
  Box<dyn Fn() -> Result<Arc<dyn StorageAdapter>, BoxError> + Send + Sync>;

/// A name keyed set of storage adapter factories.
pub struct BackendRegistry {
  factories: BTreeMap<String, Factory>,
}

impl BackendRegistry {
  /// A registry without any backend.
  pub fn empty() -> Self {
    BackendRegistry {
      factories: BTreeMap::new(),
    }
  }

  /// Register a factory under `name`. Names can only be registered once.
  pub fn register<F>(&mut self, name: &str, factory: F) -> Result<&mut Self, Error>
  where
    F: Fn() -> Result<Arc<dyn StorageAdapter>, BoxError> + Send + Sync + 'static,
  {
    if self.factories.contains_key(name) {
      return Err(Error::backend(name, "backend was registered twice"));
    }
    self.factories.insert(name.to_string(), Box::new(factory));
    Ok(self)
  }

  /// Register an already constructed adapter under `name`.
  pub fn register_instance(
    &mut self,
    name: &str,
    adapter: Arc<dyn StorageAdapter>,
  ) -> Result<&mut Self, Error> {
    self.register(name, move || Ok(adapter.clone()))
  }

  /// Create the backend registered under `name`. An empty name selects
  /// [`DEFAULT_BACKEND`].
  pub fn init(&self, name: &str) -> Result<Arc<dyn StorageAdapter>, Error> {
    let name = if name.is_empty() { DEFAULT_BACKEND } else { name };
    let factory = self
      .factories
      .get(name)
      .ok_or_else(|| Error::backend(name, "unknown backend"))?;
    factory().map_err(|err| Error::backend(name, err))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }
}

impl Default for BackendRegistry {
  /// The `fs` backend (rooted at `$STORAGE_DIR`, or the current directory)
  /// and the `null` backend.
  fn default() -> Self {
    let mut registry = BackendRegistry::empty();
    registry.factories.insert(
      FsStorage::NAME.to_string(),
      Box::new(|| {
        let dir = match std::env::var_os(STORAGE_DIR_ENV) {
          Some(dir) if !dir.is_empty() => dir.into(),
          _ => std::env::current_dir()?,
        };
        Ok(Arc::new(FsStorage::new(dir)?) as Arc<dyn StorageAdapter>)
      }),
    );
    registry.factories.insert(
      NullStorage::NAME.to_string(),
      Box::new(|| Ok(Arc::new(NullStorage) as Arc<dyn StorageAdapter>)),
    );
    registry
  }
}

impl fmt::Debug for BackendRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.factories.keys()).finish()
  }
}
