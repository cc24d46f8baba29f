use super::StorageAdapter;
use crate::account::Account;
use crate::error::StorageError;
use async_trait::async_trait;

/// A backend that stores nothing. Every boot starts from a fresh account.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl NullStorage {
  pub const NAME: &'static str = "null";
}

#[async_trait]
impl StorageAdapter for NullStorage {
  async fn load_account(
    &self,
    _domain: &str,
  ) -> Result<Option<Account>, StorageError> {
    Ok(None)
  }

  async fn save_account(&self, _account: &Account) -> Result<(), StorageError> {
    Ok(())
  }

  fn name(&self) -> &str {
    Self::NAME
  }
}
