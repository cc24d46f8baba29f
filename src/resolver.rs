use crate::certificate::ServedCell;
use crate::certificate::ServedCertificate;
use crate::error::Error;
use openssl::ssl::NameType;
use openssl::ssl::SniError;
use openssl::ssl::SslAcceptor;
use openssl::ssl::SslAlert;
use openssl::ssl::SslContextBuilder;
use openssl::ssl::SslMethod;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resolves the certificate to present for a TLS handshake.
///
/// The resolver only ever reads the currently published certificate; it
/// never blocks on, or waits for, a renewal in progress. Cloning is cheap and
/// every clone observes the same certificate.
#[derive(Clone)]
pub struct CertificateResolver {
  server_name: Arc<str>,
  served: ServedCell,
}

impl CertificateResolver {
  pub(crate) fn new(server_name: &str, served: ServedCell) -> Self {
    CertificateResolver {
      server_name: server_name.into(),
      served,
    }
  }

  /// The only server name this resolver answers for.
  pub fn server_name(&self) -> &str {
    &self.server_name
  }

  /// The certificate for `server_name`. Fails with
  /// [`Error::UnknownServerName`] for any name other than the configured
  /// primary domain.
  pub fn resolve(
    &self,
    server_name: &str,
  ) -> Result<Arc<ServedCertificate>, Error> {
    if server_name != &*self.server_name {
      return Err(Error::UnknownServerName(server_name.to_string()));
    }
    self
      .served
      .load_full()
      .ok_or_else(|| Error::NoCertificate(server_name.to_string()))
  }

  /// Install an SNI callback on `builder` switching every handshake onto the
  /// resolved certificate. Handshakes for other names are aborted with an
  /// `unrecognized_name` alert.
  pub fn configure(&self, builder: &mut SslContextBuilder) {
    let resolver = self.clone();
    builder.set_servername_callback(move |ssl, alert| {
      let name = ssl
        .servername(NameType::HOST_NAME)
        .unwrap_or_default()
        .to_string();
      match resolver.resolve(&name) {
        Ok(served) => ssl
          .set_ssl_context(served.context())
          .map_err(|_| SniError::ALERT_FATAL),
        Err(err) => {
          debug!(server_name = %name, error = %err, "Rejecting handshake");
          *alert = SslAlert::UNRECOGNIZED_NAME;
          Err(SniError::ALERT_FATAL)
        }
      }
    });
  }

  /// A server acceptor with Mozilla's intermediate settings whose
  /// certificate is chosen by this resolver.
  pub fn acceptor(&self) -> Result<SslAcceptor, Error> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    self.configure(&mut builder);
    Ok(builder.build())
  }
}

impl fmt::Debug for CertificateResolver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CertificateResolver")
      .field("server_name", &self.server_name)
      .field("served", &self.served.load_full())
      .finish()
  }
}
