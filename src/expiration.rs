use crate::certificate::ServedCertificate;
use crate::helpers::unix_time_after;
use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use std::cmp::Ordering;
use std::convert::TryInto;
use std::time::Duration;

/// Certificates expiring within this window are renewed.
pub const DEFAULT_RENEW_BEFORE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Whether the served certificate must be renewed. See [`needs_renewal_der`].
pub fn needs_renewal(cert: &ServedCertificate, renew_before: Duration) -> bool {
  needs_renewal_der(cert.der_chain(), renew_before)
}

/// Whether a DER encoded certificate chain must be renewed.
///
/// Every segment of the chain is checked, not only the leaf: the chain needs
/// renewal if any segment expires before `now + renew_before`. A segment
/// that does not parse marks the whole chain as broken, as does an empty
/// chain.
pub fn needs_renewal_der<I, B>(segments: I, renew_before: Duration) -> bool
where
  I: IntoIterator<Item = B>,
  B: AsRef<[u8]>,
{
  let threshold = match threshold(renew_before) {
    Some(threshold) => threshold,
    None => return true,
  };

  let mut seen = false;
  for segment in segments {
    seen = true;
    let cert = match X509::from_der(segment.as_ref()) {
      Ok(cert) => cert,
      Err(_) => return true,
    };
    match cert.not_after().compare(&threshold) {
      Ok(Ordering::Less) => return true,
      Ok(_) => {}
      Err(_) => return true,
    }
  }
  !seen
}

fn threshold(renew_before: Duration) -> Option<Asn1Time> {
  let at = unix_time_after(renew_before)?;
  Asn1Time::from_unix(at.try_into().ok()?).ok()
}
