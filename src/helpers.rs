use crate::error::Error;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use serde::Deserialize;
use serde::Serialize;
use std::convert::TryFrom;
use std::future::Future;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// The last second an X.509 validity field can hold, 9999-12-31T23:59:59Z.
const MAX_CERTIFICATE_TIME: i64 = 253_402_300_799;

/// The kind of private key generated for a new account.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum KeyType {
  Rsa2048,
  Rsa4096,
  EcP256,
}

impl Default for KeyType {
  fn default() -> Self {
    KeyType::Rsa4096
  }
}

impl KeyType {
  /// Generate a fresh private key of this type using the system random.
  pub fn generate(self) -> Result<PKey<Private>, Error> {
    match self {
      KeyType::Rsa2048 => gen_rsa_private_key(2048),
      KeyType::Rsa4096 => gen_rsa_private_key(4096),
      KeyType::EcP256 => gen_ec_p256_private_key(),
    }
  }
}

/// Generate a new RSA private key using the specified size,
/// using the system random.
pub fn gen_rsa_private_key(bits: u32) -> Result<PKey<Private>, Error> {
  let rsa = Rsa::generate(bits)?;
  let key = PKey::from_rsa(rsa)?;
  Ok(key)
}

/// Generate a new P256 EC private key using the system random.
pub fn gen_ec_p256_private_key() -> Result<PKey<Private>, Error> {
  let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
  let ec = EcKey::generate(&group)?;
  let key = PKey::from_ec_key(ec)?;
  Ok(key)
}

pub(crate) fn b64(data: &[u8]) -> String {
  data_encoding::BASE64URL_NOPAD.encode(data)
}

/// Seconds since the Unix epoch at `offset` from now, or `None` if that
/// point cannot be written into a certificate.
pub(crate) fn unix_time_after(offset: Duration) -> Option<i64> {
  let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
  let at = i64::try_from(now.checked_add(offset)?.as_secs()).ok()?;
  if at > MAX_CERTIFICATE_TIME {
    return None;
  }
  Some(at)
}

/// Run `fut`, failing with [`Error::Timeout`] if it takes longer than
/// `limit`.
pub(crate) async fn bounded<F>(
  operation: &'static str,
  limit: Duration,
  fut: F,
) -> Result<F::Output, Error>
where
  F: Future,
{
  tokio::time::timeout(limit, fut)
    .await
    .map_err(|_| Error::Timeout {
      operation,
      after: limit,
    })
}

/// Serde adapter storing raw bytes as standard base64 strings.
pub(crate) mod base64_bytes {
  use serde::de::Error as _;
  use serde::Deserialize;
  use serde::Deserializer;
  use serde::Serializer;

  pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&data_encoding::BASE64.encode(bytes))
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let encoded = String::deserialize(deserializer)?;
    data_encoding::BASE64
      .decode(encoded.as_bytes())
      .map_err(D::Error::custom)
  }
}
