use crate::certificate::Domain;
use crate::client::ChallengeHandlerRegistry;
use crate::client::ManualDnsHandler;
use crate::client::ValidationClientFactory;
use crate::error::Error;
use crate::expiration::DEFAULT_RENEW_BEFORE;
use crate::helpers::unix_time_after;
use crate::helpers::KeyType;
use crate::storage::BackendRegistry;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Settings of a [`CertManager`](crate::CertManager).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
  /// The domain to obtain a certificate for.
  pub domain: Domain,
  /// Name of the storage backend. Empty selects `fs`.
  pub backend_name: String,
  /// Directory URL of the validation authority. `None` selects
  /// [`LETS_ENCRYPT_URL`](crate::LETS_ENCRYPT_URL).
  pub authority_endpoint: Option<String>,
  /// Name of the DNS-01 challenge handler.
  pub challenge_handler: String,
  /// Contact email of the account.
  pub email: String,
  /// Serve a locally generated certificate instead of contacting the
  /// authority.
  pub self_signed: bool,
  /// Validity period of the self-signed certificate.
  pub self_signed_validity: Duration,
  /// Key type of newly created accounts.
  pub account_key_type: KeyType,
  /// Certificates expiring within this window are renewed.
  pub renew_before: Duration,
  /// Period of the renewal scheduler.
  pub renewal_interval: Duration,
  /// Upper bound for every call to the authority or the storage backend.
  pub network_timeout: Duration,
  /// Ask the authority to bundle issuer certificates with the leaf.
  pub bundle_ca: bool,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      domain: Domain::default(),
      backend_name: String::new(),
      authority_endpoint: None,
      challenge_handler: ManualDnsHandler::NAME.to_string(),
      email: String::new(),
      self_signed: false,
      self_signed_validity: 365 * DAY,
      account_key_type: KeyType::default(),
      renew_before: DEFAULT_RENEW_BEFORE,
      renewal_interval: DAY,
      network_timeout: Duration::from_secs(10 * 60),
      bundle_ca: true,
    }
  }
}

impl Config {
  pub fn new(domain: Domain) -> Self {
    Config {
      domain,
      ..Config::default()
    }
  }

  /// Check the settings required in every mode.
  pub fn validate(&self) -> Result<(), Error> {
    if self.domain.main.trim().is_empty() {
      return Err(Error::Configuration(
        "the main domain name must be provided".to_string(),
      ));
    }
    if self.domain.sans.iter().any(|san| san.trim().is_empty()) {
      return Err(Error::Configuration(
        "subject alternative names must not be empty".to_string(),
      ));
    }
    if self.renewal_interval.as_secs() == 0 {
      return Err(Error::Configuration(
        "the renewal interval must be at least one second".to_string(),
      ));
    }
    if Instant::now().checked_add(self.renewal_interval).is_none() {
      return Err(Error::Configuration(format!(
        "the renewal interval {:?} is out of range",
        self.renewal_interval
      )));
    }
    if unix_time_after(self.renew_before).is_none() {
      return Err(Error::Configuration(format!(
        "the renewal window {:?} is out of range",
        self.renew_before
      )));
    }
    if self.self_signed {
      if self.self_signed_validity.as_secs() == 0 {
        return Err(Error::Configuration(
          "the self-signed validity must be at least one second".to_string(),
        ));
      }
      if unix_time_after(self.self_signed_validity).is_none() {
        return Err(Error::Configuration(format!(
          "the self-signed validity {:?} is out of range",
          self.self_signed_validity
        )));
      }
    }
    Ok(())
  }

  pub fn authority_endpoint(&self) -> &str {
    match self.authority_endpoint.as_deref() {
      Some(endpoint) if !endpoint.is_empty() => endpoint,
      _ => crate::client::LETS_ENCRYPT_URL,
    }
  }
}

/// The collaborators a [`CertManager`](crate::CertManager) resolves by name
/// at initialization.
#[derive(Default)]
pub struct Providers {
  pub backends: BackendRegistry,
  pub challenge_handlers: ChallengeHandlerRegistry,
  /// Required unless the configuration is self-signed.
  pub client_factory: Option<Arc<dyn ValidationClientFactory>>,
}

impl Providers {
  /// Default registries and the given validation client factory.
  pub fn new(client_factory: Arc<dyn ValidationClientFactory>) -> Self {
    Providers {
      client_factory: Some(client_factory),
      ..Providers::default()
    }
  }
}

impl fmt::Debug for Providers {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Providers")
      .field("backends", &self.backends)
      .field("challenge_handlers", &self.challenge_handlers)
      .field("client_factory", &self.client_factory.is_some())
      .finish()
  }
}
