use crate::common::authority::MockAuthority;
use crate::common::storage::FlakyStorage;
use crate::common::storage::RawStorage;
use crate::common::*;
use acme2_autocert::storage::FsStorage;
use acme2_autocert::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;


async fn boot(
  authority: &MockAuthority,
  storage: Arc<dyn StorageAdapter>,
  config: Config,
) -> Result<CertManager, Error> {
  init_tracing();
  CertManager::initialize(config, providers(authority, storage)).await
}

#[tokio::test]
async fn first_boot_registers_and_issues() {
  let authority = MockAuthority::new();
  let storage = Arc::new(FlakyStorage::default());
  let domain = example_domain();

  let manager = boot(&authority, storage.clone(), config(domain.clone()))
    .await
    .unwrap();

  assert_eq!(authority.calls.register(), 1);
  assert_eq!(authority.calls.agree_to_terms(), 1);
  assert_eq!(authority.calls.obtain(), 1);
  assert_eq!(authority.calls.renew(), 0);
  assert_eq!(*authority.requested.lock().unwrap(), vec![domain.names()]);
  assert_eq!(*authority.endpoints.lock().unwrap(), vec![LETS_ENCRYPT_URL]);
  assert_eq!(
    *authority.excluded.lock().unwrap(),
    vec![ChallengeKind::Http01, ChallengeKind::TlsAlpn01]
  );
  assert_eq!(*authority.handlers.lock().unwrap(), vec![ChallengeKind::Dns01]);

  let resolver = manager.resolver();
  let served = resolver.resolve("example.com").unwrap();
  let names: Vec<String> = served
    .leaf()
    .subject_alt_names()
    .unwrap()
    .iter()
    .filter_map(|name| name.dnsname().map(str::to_string))
    .collect();
  assert_eq!(names, domain.names());
  assert!(matches!(
    resolver.resolve("www.example.com"),
    Err(Error::UnknownServerName(_))
  ));

  let stored = storage.stored("example.com").await;
  assert_eq!(stored.registration, Some(common::authority::registration()));
  assert_eq!(stored.domain_certificate().domain(), &domain);
  assert_eq!(
    stored.domain_certificate().certificate().cert,
    served.leaf().to_pem().unwrap()
  );

  manager.shutdown().await;
}

#[tokio::test]
async fn stored_fresh_certificate_needs_no_authority_calls() {
  let authority = MockAuthority::new();
  let domain = example_domain();
  let account = stored_account(&domain, 30);
  let expected = account.domain_certificate().certificate().cert.clone();
  let storage = Arc::new(FlakyStorage::seeded(&account).await);

  let mut config = config(domain);
  config.authority_endpoint = Some("https://ca.test/dir".to_string());
  let mut manager = boot(&authority, storage.clone(), config).await.unwrap();
  assert_eq!(served_pem(&manager.resolver(), "example.com"), expected);

  manager.wait_for_startup_renewal().await;
  assert_eq!(authority.calls.total(), 0);
  assert_eq!(storage.saves(), 0);
  assert_eq!(*authority.endpoints.lock().unwrap(), vec!["https://ca.test/dir"]);

  manager.shutdown().await;
}

#[tokio::test]
async fn stored_expiring_certificate_is_renewed_in_background() {
  let authority = MockAuthority::new();
  let domain = example_domain();
  let account = stored_account(&domain, 3);
  let old = account.domain_certificate().certificate().cert.clone();
  let storage = Arc::new(FlakyStorage::seeded(&account).await);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  assert_eq!(authority.calls.obtain(), 0);
  let resolver = manager.resolver();

  manager.wait_for_startup_renewal().await;
  assert_eq!(authority.calls.renew(), 1);
  assert_eq!(authority.calls.register(), 0);

  let served = resolver.resolve("example.com").unwrap();
  let renewed = served.leaf().to_pem().unwrap();
  assert_ne!(renewed, old);
  assert!(!needs_renewal(&served, DEFAULT_RENEW_BEFORE));

  let stored = storage.stored("example.com").await;
  assert_eq!(stored.domain_certificate().certificate().cert, renewed);

  manager.shutdown().await;
}

#[tokio::test]
async fn self_signed_mode_never_contacts_the_authority() {
  init_tracing();
  let authority = MockAuthority::new();
  let mut config = config(Domain::new("internal.example"));
  config.self_signed = true;
  config.backend_name = "does-not-exist".to_string();

  let providers = providers(&authority, Arc::new(FlakyStorage::default()));
  let manager = CertManager::initialize(config, providers).await.unwrap();

  assert_eq!(authority.calls.total(), 0);
  assert!(authority.endpoints.lock().unwrap().is_empty());

  let served = manager.resolver().resolve("internal.example").unwrap();
  let names: Vec<String> = served
    .leaf()
    .subject_alt_names()
    .unwrap()
    .iter()
    .filter_map(|name| name.dnsname().map(str::to_string))
    .collect();
  assert_eq!(names, vec!["internal.example"]);

  assert!(matches!(
    manager.renew_now().await,
    Err(Error::Configuration(_))
  ));
  manager.shutdown().await;
}

#[tokio::test]
async fn self_signed_mode_needs_no_client_factory() {
  let mut config = config(Domain::new("internal.example"));
  config.self_signed = true;
  let manager = CertManager::initialize(config, Providers::default())
    .await
    .unwrap();
  assert!(manager.acceptor().is_ok());
}

#[tokio::test]
async fn authority_mode_requires_a_client_factory() {
  let err = CertManager::initialize(config(example_domain()), Providers::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn empty_main_domain_is_rejected() {
  let authority = MockAuthority::new();
  let storage = Arc::new(FlakyStorage::default());
  let err = boot(&authority, storage, config(Domain::new("")))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Configuration(_)));
  assert_eq!(authority.calls.total(), 0);
}

#[tokio::test]
async fn out_of_range_durations_fail_initialization() {
  let authority = MockAuthority::new();

  let mut self_signed = config(Domain::new("internal.example"));
  self_signed.self_signed = true;
  self_signed.self_signed_validity = Duration::from_secs(u64::MAX);
  let err = CertManager::initialize(self_signed, Providers::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Configuration(_)));

  let mut config = config(example_domain());
  config.renewal_interval = Duration::from_secs(u64::MAX);
  let err = boot(&authority, Arc::new(FlakyStorage::default()), config)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Configuration(_)));
  assert_eq!(authority.calls.total(), 0);
}

async fn wait_for_saves(storage: &FlakyStorage, saves: usize) {
  for _ in 0..1000 {
    if storage.saves() >= saves {
      return;
    }
    tokio::task::yield_now().await;
  }
  panic!("expected {} saves, saw {}", saves, storage.saves());
}

#[tokio::test(start_paused = true)]
async fn scheduler_tick_renews_the_served_certificate() {
  let interval = Duration::from_secs(3600);
  let authority = MockAuthority::new();
  // The startup renewal gets a certificate that is itself due again.
  authority.validity_days.store(3, Ordering::SeqCst);
  let domain = example_domain();
  let storage = Arc::new(FlakyStorage::seeded(&stored_account(&domain, 3)).await);
  let mut config = config(domain);
  config.renewal_interval = interval;

  let mut manager = boot(&authority, storage.clone(), config).await.unwrap();
  manager.wait_for_startup_renewal().await;
  assert_eq!(authority.calls.renew(), 1);
  assert_eq!(storage.saves(), 1);
  let resolver = manager.resolver();
  let short_lived = served_pem(&resolver, "example.com");

  authority.validity_days.store(90, Ordering::SeqCst);
  tokio::time::advance(interval + Duration::from_secs(1)).await;
  wait_for_saves(&storage, 2).await;

  assert_eq!(authority.calls.renew(), 2);
  let served = resolver.resolve("example.com").unwrap();
  assert_ne!(served.leaf().to_pem().unwrap(), short_lived);
  assert!(!needs_renewal(&served, DEFAULT_RENEW_BEFORE));

  tokio::time::advance(interval).await;
  for _ in 0..100 {
    tokio::task::yield_now().await;
  }
  assert_eq!(authority.calls.renew(), 2);
  assert_eq!(storage.saves(), 2);

  manager.shutdown().await;
}

#[tokio::test]
async fn second_renewal_is_a_no_op() {
  let authority = MockAuthority::new();
  let domain = example_domain();
  let storage = Arc::new(FlakyStorage::seeded(&stored_account(&domain, 3)).await);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  manager.wait_for_startup_renewal().await;
  assert_eq!(authority.calls.renew(), 1);

  assert_eq!(manager.renew_now().await.unwrap(), RenewalOutcome::Skipped);
  assert_eq!(manager.renew_now().await.unwrap(), RenewalOutcome::Skipped);
  assert_eq!(authority.calls.renew(), 1);
  assert_eq!(storage.saves(), 1);

  manager.shutdown().await;
}

#[tokio::test]
async fn concurrent_renewals_reach_the_authority_once() {
  let authority = MockAuthority::new();
  *authority.renew_delay.lock().unwrap() = Duration::from_millis(50);
  let domain = example_domain();
  let storage = Arc::new(FlakyStorage::seeded(&stored_account(&domain, 3)).await);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  let (first, second, third) = tokio::join!(
    manager.renew_now(),
    manager.renew_now(),
    manager.renew_now()
  );
  manager.wait_for_startup_renewal().await;

  for outcome in &[first, second, third] {
    assert!(outcome.is_ok());
  }
  assert_eq!(authority.calls.renew(), 1);
  assert_eq!(storage.saves(), 1);

  manager.shutdown().await;
}

#[tokio::test]
async fn unknown_backend_is_fatal() {
  let authority = MockAuthority::new();
  let mut config = config(example_domain());
  config.backend_name = "s3".to_string();

  let err = boot(&authority, Arc::new(FlakyStorage::default()), config)
    .await
    .unwrap_err();
  match err {
    Error::Backend { name, .. } => assert_eq!(name, "s3"),
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(authority.calls.total(), 0);
}

#[tokio::test]
async fn unknown_challenge_handler_is_fatal() {
  let authority = MockAuthority::new();
  let mut config = config(example_domain());
  config.challenge_handler = "route53".to_string();

  let err = boot(&authority, Arc::new(FlakyStorage::default()), config)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Configuration(_)));
  assert_eq!(authority.calls.total(), 0);
}

#[tokio::test]
async fn registration_failure_is_fatal() {
  let authority = MockAuthority::new();
  authority.fail_register.store(true, Ordering::SeqCst);
  let storage = Arc::new(FlakyStorage::default());

  let err = boot(&authority, storage.clone(), config(example_domain()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Registration(_)));
  assert_eq!(authority.calls.agree_to_terms(), 0);
  assert_eq!(authority.calls.obtain(), 0);
  assert_eq!(storage.saves(), 0);
}

#[tokio::test]
async fn first_issuance_failure_is_fatal() {
  let authority = MockAuthority::new();
  authority.fail_obtain.store(true, Ordering::SeqCst);
  let domain = example_domain();

  let err = boot(
    &authority,
    Arc::new(FlakyStorage::default()),
    config(domain.clone()),
  )
  .await
  .unwrap_err();
  match err {
    Error::Issuance { domains, failures } => {
      assert_eq!(domains, domain.names());
      assert!(failures.contains_key("example.com"));
    }
    other => panic!("unexpected error: {:?}", other),
  }
}

#[tokio::test]
async fn background_renewal_failure_keeps_serving() {
  let authority = MockAuthority::new();
  authority.fail_renew.store(true, Ordering::SeqCst);
  let domain = example_domain();
  let account = stored_account(&domain, 3);
  let old = account.domain_certificate().certificate().cert.clone();
  let storage = Arc::new(FlakyStorage::seeded(&account).await);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  manager.wait_for_startup_renewal().await;

  assert_eq!(authority.calls.renew(), 1);
  assert_eq!(served_pem(&manager.resolver(), "example.com"), old);
  assert!(matches!(
    manager.renew_now().await,
    Err(Error::Issuance { .. })
  ));
  assert_eq!(authority.calls.renew(), 2);

  manager.shutdown().await;
}

#[tokio::test]
async fn persistence_failure_on_first_issuance_is_reported() {
  let authority = MockAuthority::new();
  let storage = Arc::new(FlakyStorage::default());
  storage.fail_saves.store(true, Ordering::SeqCst);

  let err = boot(&authority, storage.clone(), config(example_domain()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Persistence(_)));
  assert_eq!(authority.calls.obtain(), 1);
  assert_eq!(storage.saves(), 1);
}

#[tokio::test]
async fn renewed_certificate_is_served_even_if_not_persisted() {
  let authority = MockAuthority::new();
  let domain = example_domain();
  let account = stored_account(&domain, 3);
  let old = account.domain_certificate().certificate().cert.clone();
  let storage = Arc::new(FlakyStorage::seeded(&account).await);
  storage.fail_saves.store(true, Ordering::SeqCst);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  manager.wait_for_startup_renewal().await;

  assert_eq!(authority.calls.renew(), 1);
  assert_ne!(served_pem(&manager.resolver(), "example.com"), old);
  let stored = storage.stored("example.com").await;
  assert_eq!(stored.domain_certificate().certificate().cert, old);

  manager.shutdown().await;
}

#[tokio::test]
async fn renewal_for_another_domain_is_rejected() {
  let authority = MockAuthority::new();
  *authority.renewed_domain.lock().unwrap() = Some("evil.example".to_string());
  let domain = example_domain();
  let account = stored_account(&domain, 3);
  let old = account.domain_certificate().certificate().cert.clone();
  let storage = Arc::new(FlakyStorage::seeded(&account).await);

  let mut manager =
    boot(&authority, storage.clone(), config(domain)).await.unwrap();
  manager.wait_for_startup_renewal().await;

  match manager.renew_now().await {
    Err(Error::DomainMismatch { expected, actual }) => {
      assert_eq!(expected, "example.com");
      assert_eq!(actual, "evil.example");
    }
    other => panic!("unexpected result: {:?}", other),
  }
  assert_eq!(served_pem(&manager.resolver(), "example.com"), old);
  assert_eq!(storage.saves(), 0);

  manager.shutdown().await;
}

#[tokio::test]
async fn corrupt_stored_certificate_is_fatal() {
  let authority = MockAuthority::new();
  let domain = example_domain();
  let mut record = serde_json::to_value(&stored_account(&domain, 30)).unwrap();
  record["domainCertificate"]["certificate"]["cert"] =
    json!(data_encoding::BASE64.encode(b"not a certificate"));

  let err = boot(&authority, Arc::new(RawStorage(record)), config(domain))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::CorruptStorage(_)));
  assert_eq!(authority.calls.total(), 0);
}

#[tokio::test]
async fn malformed_record_is_fatal() {
  let authority = MockAuthority::new();
  let record = json!({ "email": 42 });

  let err = boot(
    &authority,
    Arc::new(RawStorage(record)),
    config(example_domain()),
  )
  .await
  .unwrap_err();
  assert!(matches!(err, Error::CorruptStorage(_)));
}

#[tokio::test]
async fn restart_reuses_the_persisted_account() -> anyhow::Result<()> {
  let dir = tempfile::tempdir()?;
  let authority = MockAuthority::new();
  let domain = example_domain();
  let storage: Arc<dyn StorageAdapter> = Arc::new(FsStorage::new(dir.path())?);

  let manager = boot(&authority, storage.clone(), config(domain.clone())).await?;
  let first = served_pem(&manager.resolver(), "example.com");
  manager.shutdown().await;

  let mut manager = boot(&authority, storage, config(domain)).await?;
  manager.wait_for_startup_renewal().await;
  assert_eq!(served_pem(&manager.resolver(), "example.com"), first);
  assert_eq!(authority.calls.register(), 1);
  assert_eq!(authority.calls.obtain(), 1);
  assert_eq!(authority.calls.renew(), 0);

  manager.shutdown().await;
  Ok(())
}

#[tokio::test]
async fn acceptor_serves_the_managed_certificate() {
  use openssl::ssl::Ssl;
  use openssl::ssl::SslConnector;
  use openssl::ssl::SslMethod;
  use openssl::ssl::SslVerifyMode;
  use std::net::TcpListener;
  use std::net::TcpStream;

  let authority = MockAuthority::new();
  let manager = boot(
    &authority,
    Arc::new(FlakyStorage::default()),
    config(example_domain()),
  )
  .await
  .unwrap();
  let expected = served_pem(&manager.resolver(), "example.com");

  let acceptor = manager.acceptor().unwrap();
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  let server = std::thread::spawn(move || {
    let (stream, _) = listener.accept().unwrap();
    let _ = acceptor.accept(stream);
  });

  let mut connector = SslConnector::builder(SslMethod::tls()).unwrap();
  connector.set_verify(SslVerifyMode::NONE);
  let connector = connector.build();
  let mut ssl = Ssl::new(connector.context()).unwrap();
  ssl.set_hostname("example.com").unwrap();
  let stream = ssl.connect(TcpStream::connect(addr).unwrap()).unwrap();
  let presented = stream.ssl().peer_certificate().unwrap().to_pem().unwrap();
  server.join().unwrap();

  assert_eq!(presented, expected);
  manager.shutdown().await;
}
