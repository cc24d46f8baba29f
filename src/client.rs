use crate::account::AccountIdentity;
use crate::account::Registration;
use crate::certificate::Certificate;
use crate::error::*;
use crate::helpers::b64;
use crate::helpers::KeyType;
use async_trait::async_trait;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The production Let's Encrypt directory, used when no authority endpoint
/// is configured.
pub const LETS_ENCRYPT_URL: &str =
  "https://acme-v02.api.letsencrypt.org/directory";

/// The Let's Encrypt staging directory.
pub const LETS_ENCRYPT_STAGING_URL: &str =
  "https://acme-staging-v02.api.letsencrypt.org/directory";

/// A mechanism the validation authority can use to verify control over a
/// domain.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ChallengeKind {
  Http01,
  TlsAlpn01,
  Dns01,
}

impl fmt::Display for ChallengeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ChallengeKind::Http01 => "http-01",
      ChallengeKind::TlsAlpn01 => "tls-alpn-01",
      ChallengeKind::Dns01 => "dns-01",
    })
  }
}

/// A certificate as exchanged with a [`ValidationClient`].
#[derive(Clone, Default, Eq, PartialEq)]
pub struct CertificateResource {
  pub domain: String,
  pub cert_url: String,
  pub cert_stable_url: String,
  /// PEM encoded private key.
  pub private_key: Vec<u8>,
  /// PEM encoded certificate, bundled with its issuers if requested.
  pub certificate: Vec<u8>,
}

impl fmt::Debug for CertificateResource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CertificateResource")
      .field("domain", &self.domain)
      .field("cert_url", &self.cert_url)
      .field("cert_stable_url", &self.cert_stable_url)
      .finish()
  }
}

impl From<CertificateResource> for Certificate {
  fn from(resource: CertificateResource) -> Self {
    Certificate {
      domain: resource.domain,
      cert_url: resource.cert_url,
      cert_stable_url: resource.cert_stable_url,
      private_key: resource.private_key,
      cert: resource.certificate,
    }
  }
}

impl From<&Certificate> for CertificateResource {
  fn from(cert: &Certificate) -> Self {
    CertificateResource {
      domain: cert.domain.clone(),
      cert_url: cert.cert_url.clone(),
      cert_stable_url: cert.cert_stable_url.clone(),
      private_key: cert.private_key.clone(),
      certificate: cert.cert.clone(),
    }
  }
}

/// Per domain failures of an issuance request.
pub type IssuanceFailures = BTreeMap<String, BoxError>;

/// A client of a validation authority (an ACME server) acting on behalf of
/// one account.
#[async_trait]
pub trait ValidationClient: Send + Sync {
  /// Register the account with the authority.
  async fn register(&self) -> Result<Registration, BoxError>;

  /// Agree to the authority's current terms of service.
  async fn agree_to_terms(&self) -> Result<(), BoxError>;

  /// Obtain a certificate covering all `domains`, the first one being the
  /// primary name.
  async fn obtain_certificate(
    &self,
    domains: &[String],
    bundle: bool,
  ) -> Result<CertificateResource, IssuanceFailures>;

  /// Renew an existing certificate.
  async fn renew_certificate(
    &self,
    existing: CertificateResource,
    bundle: bool,
  ) -> Result<CertificateResource, BoxError>;

  /// Never attempt the given challenge kinds.
  fn exclude_challenges(&mut self, kinds: &[ChallengeKind]);

  /// Use `handler` to solve challenges of `kind`.
  fn set_challenge_handler(
    &mut self,
    kind: ChallengeKind,
    handler: Arc<dyn ChallengeHandler>,
  );
}

/// Builds a [`ValidationClient`] bound to an authority endpoint and an
/// account identity.
pub trait ValidationClientFactory: Send + Sync {
  fn build(
    &self,
    endpoint: &str,
    identity: &AccountIdentity,
    key_type: KeyType,
  ) -> Result<Box<dyn ValidationClient>, BoxError>;
}

/// Proves control over a domain to the validation authority.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
  /// Make the proof for `domain` available.
  async fn present(
    &self,
    domain: &str,
    token: &str,
    key_authorization: &str,
  ) -> Result<(), BoxError>;

  /// Remove the proof once the authority has validated it.
  async fn clean_up(
    &self,
    domain: &str,
    token: &str,
    key_authorization: &str,
  ) -> Result<(), BoxError>;
}

/// The TXT record name and value proving control of `domain` for the
/// DNS-01 challenge.
pub fn dns01_record(
  domain: &str,
  key_authorization: &str,
) -> Result<(String, String), Error> {
  let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())?;
  let name = format!("_acme-challenge.{}.", domain.trim_end_matches('.'));
  Ok((name, b64(&digest)))
}

/// A DNS-01 handler for operators provisioning records by hand: it logs
/// the record to create and then waits for it to propagate.
#[derive(Debug, Clone)]
pub struct ManualDnsHandler {
  propagation_delay: Duration,
}

impl ManualDnsHandler {
  pub const NAME: &'static str = "manual";

  pub fn new(propagation_delay: Duration) -> Self {
    ManualDnsHandler { propagation_delay }
  }
}

impl Default for ManualDnsHandler {
  fn default() -> Self {
    ManualDnsHandler::new(Duration::from_secs(60))
  }
}

#[async_trait]
impl ChallengeHandler for ManualDnsHandler {
  async fn present(
    &self,
    domain: &str,
    _token: &str,
    key_authorization: &str,
  ) -> Result<(), BoxError> {
    let (name, value) = dns01_record(domain, key_authorization)?;
    info!(
      record = %name,
      value = %value,
      delay = ?self.propagation_delay,
      "Create this TXT record, waiting for it to propagate"
    );
    tokio::time::sleep(self.propagation_delay).await;
    Ok(())
  }

  async fn clean_up(
    &self,
    domain: &str,
    _token: &str,
    key_authorization: &str,
  ) -> Result<(), BoxError> {
    let (name, _) = dns01_record(domain, key_authorization)?;
    info!(record = %name, "The TXT record can be removed");
    Ok(())
  }
}

type HandlerFactory =
  Box<dyn Fn() -> Result<Arc<dyn ChallengeHandler>, BoxError> + Send + Sync>;

/// A name keyed set of challenge handler factories.
pub struct ChallengeHandlerRegistry {
  factories: BTreeMap<String, HandlerFactory>,
}

impl ChallengeHandlerRegistry {
  pub fn empty() -> Self {
    ChallengeHandlerRegistry {
      factories: BTreeMap::new(),
    }
  }

  /// Register a factory under `name`, replacing any previous one.
  pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
  where
    F: Fn() -> Result<Arc<dyn ChallengeHandler>, BoxError>
      + Send
      + Sync
      + 'static,
  {
    self.factories.insert(name.to_string(), Box::new(factory));
    self
  }

  /// Create the handler registered under `name`.
  pub fn create(&self, name: &str) -> Result<Arc<dyn ChallengeHandler>, Error> {
    let factory = self.factories.get(name).ok_or_else(|| {
      Error::Configuration(format!("unknown challenge handler {:?}", name))
    })?;
    factory().map_err(|err| {
      Error::Configuration(format!(
        "challenge handler {:?} could not be created: {}",
        name, err
      ))
    })
  }
}

impl Default for ChallengeHandlerRegistry {
  /// Contains the [`ManualDnsHandler`] under `manual`.
  fn default() -> Self {
    let mut registry = ChallengeHandlerRegistry::empty();
    registry.register(ManualDnsHandler::NAME, || {
      Ok(Arc::new(ManualDnsHandler::default()) as Arc<dyn ChallengeHandler>)
    });
    registry
  }
}

impl fmt::Debug for ChallengeHandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.factories.keys()).finish()
  }
}
