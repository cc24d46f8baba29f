use std::collections::BTreeMap;
use std::time::Duration;

/// A boxed error as returned by pluggable collaborators (storage backends,
/// validation clients, challenge handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("storage backend {name:?} is unavailable: {source}")]
  Backend {
    name: String,
    #[source]
    source: BoxError,
  },

  #[error("stored key or certificate is malformed: {0}")]
  CorruptStorage(#[source] BoxError),

  #[error("account registration failed: {0}")]
  Registration(#[source] BoxError),

  #[error("could not obtain a certificate for {domains:?}: {failures:?}")]
  Issuance {
    domains: Vec<String>,
    failures: BTreeMap<String, String>,
  },

  #[error("renewed certificate is for {actual:?}, expected {expected:?}")]
  DomainMismatch { expected: String, actual: String },

  #[error("could not persist account: {0}")]
  Persistence(#[source] BoxError),

  #[error("unknown server name {0:?}")]
  UnknownServerName(String),

  #[error("no certificate has been published for {0:?} yet")]
  NoCertificate(String),

  #[error("validation client could not be built: {0}")]
  Client(#[source] BoxError),

  #[error("{operation} did not complete within {after:?}")]
  Timeout {
    operation: &'static str,
    after: Duration,
  },

  #[error(transparent)]
  Crypto(#[from] openssl::error::ErrorStack),
}

impl Error {
  pub(crate) fn corrupt<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    Error::CorruptStorage(err.into())
  }

  pub(crate) fn backend<E>(name: &str, err: E) -> Self
  where
    E: Into<BoxError>,
  {
    Error::Backend {
      name: name.to_string(),
      source: err.into(),
    }
  }

  /// Wrap a single failed authority call for `domain` as an issuance error.
  pub(crate) fn issuance(domains: Vec<String>, domain: &str, err: BoxError) -> Self {
    let mut failures = BTreeMap::new();
    failures.insert(domain.to_string(), err.to_string());
    Error::Issuance { domains, failures }
  }
}

/// Errors reported by a [`StorageAdapter`](crate::StorageAdapter).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("stored account record is malformed: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("invalid storage key {0:?}")]
  InvalidKey(String),

  #[error(transparent)]
  Other(BoxError),
}

impl StorageError {
  /// Map a failed load into the orchestrator's taxonomy.
  pub(crate) fn into_load_error(self, backend: &str) -> Error {
    match self {
      StorageError::Serialization(err) => Error::corrupt(err),
      other => Error::backend(backend, other),
    }
  }
}
