use super::StorageAdapter;
use crate::account::Account;
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::trace;

/// Stores each account as a pretty printed JSON file named after its
/// primary domain, e.g. `example.com.json`.
#[derive(Debug)]
pub struct FsStorage {
  dir: PathBuf,
  lock: RwLock<()>,
}

impl FsStorage {
  pub const NAME: &'static str = "fs";

  /// Create a storage rooted at `dir`, creating the directory if needed.
  pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
    let dir = dir.into();
    std::fs::create_dir_all(&dir)?;
    Ok(FsStorage {
      dir,
      lock: RwLock::new(()),
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn key(&self, domain: &str) -> Result<PathBuf, StorageError> {
    if domain.is_empty()
      || domain.starts_with('.')
      || domain.contains(|c| c == '/' || c == '\\')
    {
      return Err(StorageError::InvalidKey(domain.to_string()));
    }
    Ok(self.dir.join(format!("{}.json", domain)))
  }
}

#[async_trait]
impl StorageAdapter for FsStorage {
  async fn load_account(
    &self,
    domain: &str,
  ) -> Result<Option<Account>, StorageError> {
    let path = self.key(domain)?;
    let _guard = self.lock.read().await;

    let data = match tokio::fs::read(&path).await {
      Ok(data) => data,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        trace!(path = %path.display(), "No stored account");
        return Ok(None);
      }
      Err(err) => return Err(err.into()),
    };
    if data.is_empty() {
      trace!(path = %path.display(), "Stored account is empty");
      return Ok(None);
    }

    let account = serde_json::from_slice(&data)?;
    debug!(path = %path.display(), "Loaded account");
    Ok(Some(account))
  }

  async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
    let path = self.key(account.storage_key())?;
    let data = serde_json::to_vec_pretty(account)?;

    let _guard = self.lock.write().await;
    let tmp = path.with_extension("json.tmp");
    // A leftover temp file would keep its old mode.
    match tokio::fs::remove_file(&tmp).await {
      Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
        return Err(err.into())
      }
      _ => {}
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&tmp).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, &path).await?;

    debug!(path = %path.display(), "Saved account");
    Ok(())
  }

  fn name(&self) -> &str {
    Self::NAME
  }
}
