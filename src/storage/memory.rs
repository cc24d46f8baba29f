use super::StorageAdapter;
use crate::account::Account;
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Keeps serialized account records in memory.
///
/// Records go through the same JSON encoding as the durable backends, so a
/// loaded account never shares state with the saved one.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
  pub const NAME: &'static str = "memory";

  pub fn new() -> Self {
    Self::default()
  }

  /// Whether a record is stored under `domain`.
  pub async fn contains(&self, domain: &str) -> bool {
    self.records.lock().await.contains_key(domain)
  }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
  async fn load_account(
    &self,
    domain: &str,
  ) -> Result<Option<Account>, StorageError> {
    let records = self.records.lock().await;
    match records.get(domain) {
      Some(data) => Ok(Some(serde_json::from_slice(data)?)),
      None => Ok(None),
    }
  }

  async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
    let data = serde_json::to_vec(account)?;
    self
      .records
      .lock()
      .await
      .insert(account.storage_key().to_string(), data);
    Ok(())
  }

  fn name(&self) -> &str {
    Self::NAME
  }
}
