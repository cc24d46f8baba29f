use crate::certificate::Domain;
use crate::certificate::DomainCertificate;
use crate::error::*;
use crate::helpers::base64_bytes;
use crate::helpers::KeyType;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// The registration resource returned by the validation authority when an
/// account is registered. Opaque to this crate apart from its location.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
  /// The URL identifying the account at the authority.
  pub uri: String,
  /// The terms of service the account agreed to, if known.
  #[serde(default)]
  pub terms_of_service: Option<String>,
  /// The raw account object as returned by the authority.
  #[serde(default)]
  pub body: serde_json::Value,
}

/// An account at the validation authority, owning the certificate of one
/// domain.
///
/// Accounts are stored under the primary name of their domain. An account
/// should be created with [`Account::new`] on first boot and loaded from a
/// [`StorageAdapter`](crate::StorageAdapter) afterwards.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
  /// The contact email registered with the authority.
  pub email: String,
  /// DER encoded private key identifying this account to the authority.
  /// This is not the certificate private key.
  #[serde(with = "base64_bytes")]
  pub(crate) private_key: Vec<u8>,
  /// The registration resource, once the account has been registered.
  pub registration: Option<Registration>,
  pub(crate) domain_certificate: DomainCertificate,
}

/// What a validation client needs to act on behalf of an [`Account`].
#[derive(Clone)]
pub struct AccountIdentity {
  pub email: String,
  pub private_key: PKey<Private>,
  pub registration: Option<Registration>,
}

impl fmt::Debug for AccountIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AccountIdentity")
      .field("email", &self.email)
      .field("key_bits", &self.private_key.bits())
      .field("registration", &self.registration)
      .finish()
  }
}

impl Account {
  /// Create a new, unregistered account for `domain` with a freshly
  /// generated private key and no certificate.
  pub fn new(
    email: impl Into<String>,
    domain: Domain,
    key_type: KeyType,
  ) -> Result<Account, Error> {
    let private_key = key_type.generate()?.private_key_to_der()?;
    Ok(Account {
      email: email.into(),
      private_key,
      registration: None,
      domain_certificate: DomainCertificate::new(domain),
    })
  }

  /// The primary domain name, which is also this account's storage key.
  pub fn storage_key(&self) -> &str {
    &self.domain_certificate.domain().main
  }

  /// Retrieve the private key for this account.
  pub fn private_key(&self) -> Result<PKey<Private>, Error> {
    PKey::private_key_from_der(&self.private_key).map_err(Error::corrupt)
  }

  pub fn identity(&self) -> Result<AccountIdentity, Error> {
    Ok(AccountIdentity {
      email: self.email.clone(),
      private_key: self.private_key()?,
      registration: self.registration.clone(),
    })
  }

  pub fn domain_certificate(&self) -> &DomainCertificate {
    &self.domain_certificate
  }

  pub fn domain_certificate_mut(&mut self) -> &mut DomainCertificate {
    &mut self.domain_certificate
  }
}

impl fmt::Debug for Account {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Account")
      .field("email", &self.email)
      .field("registration", &self.registration)
      .field("domain_certificate", &self.domain_certificate)
      .finish()
  }
}
