use crate::certificate::ServedCertificate;
use crate::error::Error;
use crate::helpers::gen_rsa_private_key;
use crate::helpers::unix_time_after;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::bn::MsbOption;
use openssl::hash::MessageDigest;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::extension::KeyUsage;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use openssl::x509::X509;
use std::convert::TryInto;
use std::time::Duration;
use tracing::instrument;
use tracing::Level;

/// Generate a self-signed certificate for `domain`, valid from now for
/// `validity`, with a fresh 2048 bit RSA key.
#[instrument(level = Level::INFO, name = "acme2_autocert::self_signed", err)]
pub fn generate_self_signed(
  domain: &str,
  validity: Duration,
) -> Result<ServedCertificate, Error> {
  let out_of_range = || {
    Error::Configuration(format!(
      "a self-signed validity of {:?} is out of range",
      validity
    ))
  };
  let now = unix_time_after(Duration::from_secs(0)).ok_or_else(out_of_range)?;
  let expires = unix_time_after(validity).ok_or_else(out_of_range)?;
  let not_before =
    Asn1Time::from_unix(now.try_into().map_err(|_| out_of_range())?)?;
  let not_after =
    Asn1Time::from_unix(expires.try_into().map_err(|_| out_of_range())?)?;

  let pkey = gen_rsa_private_key(2048)?;

  let name = {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", domain)?;
    name.build()
  };

  let serial = {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()?
  };

  let mut builder = X509::builder()?;
  builder.set_version(2)?;
  builder.set_serial_number(&serial)?;
  builder.set_subject_name(&name)?;
  builder.set_issuer_name(&name)?;
  builder.set_pubkey(&pkey)?;
  builder.set_not_before(&not_before)?;
  builder.set_not_after(&not_after)?;

  let basic_constraints = BasicConstraints::new().critical().build()?;
  builder.append_extension(basic_constraints)?;
  let key_usage = KeyUsage::new()
    .critical()
    .digital_signature()
    .key_encipherment()
    .build()?;
  builder.append_extension(key_usage)?;
  let san = SubjectAlternativeName::new()
    .dns(domain)
    .build(&builder.x509v3_context(None, None))?;
  builder.append_extension(san)?;

  builder.sign(&pkey, MessageDigest::sha256())?;

  ServedCertificate::from_parts(vec![builder.build()], pkey)
}
