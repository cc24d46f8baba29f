//! Automatic TLS certificates for a single domain.
//!
//! A [`CertManager`] loads (or creates and registers) the account of a
//! domain, obtains a certificate from a validation authority when none is
//! stored, renews it before it expires, and publishes it to a
//! [`CertificateResolver`] consulted on every TLS handshake.
//!
//! The exchange with the authority is not implemented here. Callers supply
//! a [`ValidationClientFactory`] producing a [`ValidationClient`] for their
//! ACME implementation of choice.

mod account;
mod certificate;
mod client;
mod config;
mod error;
mod expiration;
mod helpers;
mod manager;
mod resolver;
mod scheduler;
mod self_signed;
pub mod storage;

pub use account::*;
pub use certificate::Certificate;
pub use certificate::Domain;
pub use certificate::DomainCertificate;
pub use certificate::ServedCertificate;
pub use client::*;
pub use config::*;
pub use error::*;
pub use expiration::*;
pub use helpers::gen_ec_p256_private_key;
pub use helpers::gen_rsa_private_key;
pub use helpers::KeyType;
pub use manager::CertManager;
pub use resolver::CertificateResolver;
pub use scheduler::*;
pub use self_signed::generate_self_signed;
pub use storage::BackendRegistry;
pub use storage::StorageAdapter;
