use crate::error::Error;
use crate::helpers::base64_bytes;
use arc_swap::ArcSwapOption;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::ssl::SslContext;
use openssl::ssl::SslMethod;
use openssl::x509::X509;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A primary host name plus the additional names covered by the same
/// certificate.
#[derive(Deserialize, Serialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
  /// The primary host name. Also the storage key of the owning account.
  pub main: String,
  /// Subject alternative names, in the order they are requested.
  #[serde(default)]
  pub sans: Vec<String>,
}

impl Domain {
  pub fn new(main: impl Into<String>) -> Self {
    Domain {
      main: main.into(),
      sans: vec![],
    }
  }

  pub fn with_sans(main: impl Into<String>, sans: Vec<String>) -> Self {
    Domain {
      main: main.into(),
      sans,
    }
  }

  /// All names of this domain, primary first.
  pub fn names(&self) -> Vec<String> {
    let mut names = Vec::with_capacity(self.sans.len() + 1);
    names.push(self.main.clone());
    names.extend(self.sans.iter().cloned());
    names
  }
}

/// A certificate as issued by the validation authority.
///
/// Never mutated once issued; a renewal replaces it wholesale.
#[derive(Deserialize, Serialize, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
  /// The domain the authority issued this certificate for.
  pub domain: String,
  pub cert_url: String,
  pub cert_stable_url: String,
  /// PEM encoded private key of the certificate.
  #[serde(with = "base64_bytes")]
  pub private_key: Vec<u8>,
  /// PEM encoded certificate chain, leaf first.
  #[serde(with = "base64_bytes")]
  pub cert: Vec<u8>,
}

impl Certificate {
  /// Whether this certificate carries both key and certificate material.
  pub fn has_material(&self) -> bool {
    !self.cert.is_empty() && !self.private_key.is_empty()
  }
}

impl fmt::Debug for Certificate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Certificate")
      .field("domain", &self.domain)
      .field("cert_url", &self.cert_url)
      .field("cert_stable_url", &self.cert_stable_url)
      .field("cert_len", &self.cert.len())
      .finish()
  }
}

/// A parsed, ready to serve certificate: the chain, its private key, and an
/// OpenSSL server context carrying both.
pub struct ServedCertificate {
  chain: Vec<X509>,
  der_chain: Vec<Vec<u8>>,
  private_key: PKey<Private>,
  context: SslContext,
}

impl ServedCertificate {
  /// Parse a PEM certificate chain and PEM private key into a servable
  /// certificate. Fails with [`Error::CorruptStorage`] if either does not
  /// parse or the key does not belong to the leaf certificate.
  pub fn from_pem(cert: &[u8], private_key: &[u8]) -> Result<Self, Error> {
    let chain = X509::stack_from_pem(cert).map_err(Error::corrupt)?;
    let private_key =
      PKey::private_key_from_pem(private_key).map_err(Error::corrupt)?;
    Self::from_parts(chain, private_key)
  }

  pub(crate) fn from_parts(
    chain: Vec<X509>,
    private_key: PKey<Private>,
  ) -> Result<Self, Error> {
    let leaf = chain
      .first()
      .ok_or_else(|| Error::corrupt("certificate chain is empty"))?;

    let mut builder =
      SslContext::builder(SslMethod::tls_server()).map_err(Error::corrupt)?;
    builder.set_certificate(leaf).map_err(Error::corrupt)?;
    for intermediate in &chain[1..] {
      builder
        .add_extra_chain_cert(intermediate.clone())
        .map_err(Error::corrupt)?;
    }
    builder
      .set_private_key(&private_key)
      .map_err(Error::corrupt)?;
    builder.check_private_key().map_err(Error::corrupt)?;

    let der_chain = chain
      .iter()
      .map(|cert| cert.to_der())
      .collect::<Result<Vec<_>, _>>()
      .map_err(Error::corrupt)?;

    Ok(ServedCertificate {
      chain,
      der_chain,
      private_key,
      context: builder.build(),
    })
  }

  /// The leaf certificate.
  pub fn leaf(&self) -> &X509 {
    &self.chain[0]
  }

  pub fn chain(&self) -> &[X509] {
    &self.chain
  }

  /// DER encoding of every certificate in the chain.
  pub fn der_chain(&self) -> &[Vec<u8>] {
    &self.der_chain
  }

  pub fn private_key(&self) -> &PKey<Private> {
    &self.private_key
  }

  /// A server context with this certificate and key installed.
  pub fn context(&self) -> &SslContext {
    &self.context
  }
}

impl fmt::Debug for ServedCertificate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServedCertificate")
      .field("common_name", &common_name(self.leaf()))
      .field("not_after", &self.leaf().not_after().to_string())
      .field("chain_len", &self.chain.len())
      .finish()
  }
}

fn common_name(cert: &X509) -> Option<String> {
  cert
    .subject_name()
    .entries_by_nid(Nid::COMMONNAME)
    .next()
    .map(|entry| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
}

/// The live, atomically replaced parsed certificate of a domain. Shared
/// between the lifecycle manager (writer) and the TLS resolver (readers).
pub(crate) type ServedCell = Arc<ArcSwapOption<ServedCertificate>>;

/// A domain together with its current certificate and the parsed form of
/// that certificate.
///
/// The parsed form is derived before the raw certificate is replaced, so a
/// certificate that fails to parse never replaces a working one.
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DomainCertificate {
  domain: Domain,
  certificate: Certificate,
  #[serde(skip)]
  served: ServedCell,
}

impl DomainCertificate {
  /// An empty domain certificate, as held by a freshly created account.
  pub fn new(domain: Domain) -> Self {
    DomainCertificate {
      domain,
      certificate: Certificate::default(),
      served: ServedCell::default(),
    }
  }

  pub fn domain(&self) -> &Domain {
    &self.domain
  }

  pub fn certificate(&self) -> &Certificate {
    &self.certificate
  }

  /// The currently published parsed certificate, if any.
  pub fn served(&self) -> Option<Arc<ServedCertificate>> {
    self.served.load_full()
  }

  pub(crate) fn served_cell(&self) -> ServedCell {
    self.served.clone()
  }

  /// Re-derive the parsed certificate from the stored raw bytes. Needed
  /// after loading from storage, which only keeps the raw bytes.
  pub fn init(&self) -> Result<(), Error> {
    let served = ServedCertificate::from_pem(
      &self.certificate.cert,
      &self.certificate.private_key,
    )?;
    self.served.store(Some(Arc::new(served)));
    Ok(())
  }

  /// Attach a newly obtained certificate for `domain`.
  pub fn add_certificate(
    &mut self,
    certificate: Certificate,
    domain: Domain,
  ) -> Result<(), Error> {
    let served =
      ServedCertificate::from_pem(&certificate.cert, &certificate.private_key)?;
    self.domain = domain;
    self.certificate = certificate;
    self.served.store(Some(Arc::new(served)));
    Ok(())
  }

  /// Replace the current certificate with a renewed one. The renewed
  /// certificate must have been issued for this domain; otherwise
  /// [`Error::DomainMismatch`] is returned and nothing changes.
  pub fn renew_certificate(
    &mut self,
    certificate: Certificate,
  ) -> Result<(), Error> {
    if certificate.domain != self.domain.main {
      return Err(Error::DomainMismatch {
        expected: self.domain.main.clone(),
        actual: certificate.domain,
      });
    }
    let served =
      ServedCertificate::from_pem(&certificate.cert, &certificate.private_key)?;
    self.certificate = certificate;
    self.served.store(Some(Arc::new(served)));
    Ok(())
  }
}
