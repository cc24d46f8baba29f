use crate::account::Account;
use crate::certificate::Domain;
use crate::client::CertificateResource;
use crate::client::ChallengeKind;
use crate::client::ValidationClient;
use crate::config::Config;
use crate::config::Providers;
use crate::error::*;
use crate::expiration::needs_renewal;
use crate::helpers::bounded;
use crate::resolver::CertificateResolver;
use crate::scheduler::RenewalHandle;
use crate::scheduler::RenewalOutcome;
use crate::scheduler::RenewalScheduler;
use crate::scheduler::Renew;
use crate::self_signed::generate_self_signed;
use crate::storage::StorageAdapter;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use openssl::ssl::SslAcceptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::instrument;
use tracing::warn;
use tracing::Level;
use tracing_futures::Instrument;

/// The account of one domain together with the collaborators needed to keep
/// its certificate current.
///
/// The account mutex is held for the whole of an issuance or renewal, so
/// concurrent triggers never submit two requests to the authority for the
/// same domain.
pub(crate) struct Lifecycle {
  domain: Domain,
  account: Mutex<Account>,
  client: Arc<dyn ValidationClient>,
  storage: Arc<dyn StorageAdapter>,
  renew_before: Duration,
  network_timeout: Duration,
  bundle_ca: bool,
}

impl Lifecycle {
  /// Obtain a first certificate, publish it, and persist the account.
  #[instrument(level = Level::INFO, name = "acme2_autocert::obtain", err, skip(self, account), fields(domain = %self.domain.main))]
  async fn obtain(&self, account: &mut Account) -> Result<(), Error> {
    let domains = self.domain.names();
    info!(domains = ?domains, "Retrieving certificate");

    let issued = bounded(
      "certificate issuance",
      self.network_timeout,
      self.client.obtain_certificate(&domains, self.bundle_ca),
    )
    .await
    .map_err(|err| Error::issuance(domains.clone(), &self.domain.main, err.into()))?;
    let resource = issued.map_err(|failures| Error::Issuance {
      domains: domains.clone(),
      failures: failures
        .into_iter()
        .map(|(domain, err)| (domain, err.to_string()))
        .collect(),
    })?;

    account
      .domain_certificate_mut()
      .add_certificate(resource.into(), self.domain.clone())?;
    self.persist(account).await?;

    info!("Retrieved certificate");
    Ok(())
  }

  async fn persist(&self, account: &Account) -> Result<(), Error> {
    match bounded(
      "account save",
      self.network_timeout,
      self.storage.save_account(account),
    )
    .await
    {
      Ok(Ok(())) => Ok(()),
      Ok(Err(err)) => Err(Error::Persistence(err.into())),
      Err(timeout) => Err(Error::Persistence(timeout.into())),
    }
  }

  async fn renew_locked(
    &self,
    account: &mut Account,
  ) -> Result<RenewalOutcome, Error> {
    let dc = account.domain_certificate();
    if !dc.certificate().has_material() {
      self.obtain(account).await?;
      return Ok(RenewalOutcome::Renewed);
    }

    let due = match dc.served() {
      Some(served) => needs_renewal(&served, self.renew_before),
      None => true,
    };
    if !due {
      debug!("Certificate is not due for renewal");
      return Ok(RenewalOutcome::Skipped);
    }

    info!("Renewing certificate");
    let existing = CertificateResource::from(dc.certificate());
    let renewed = bounded(
      "certificate renewal",
      self.network_timeout,
      self.client.renew_certificate(existing, self.bundle_ca),
    )
    .await
    .map_err(|err| self.renewal_error(err.into()))?
    .map_err(|err| self.renewal_error(err))?;

    account
      .domain_certificate_mut()
      .renew_certificate(renewed.into())?;
    self.persist(account).await?;

    info!("Renewed certificate");
    Ok(RenewalOutcome::Renewed)
  }

  fn renewal_error(&self, err: BoxError) -> Error {
    Error::issuance(self.domain.names(), &self.domain.main, err)
  }
}

#[async_trait]
impl Renew for Lifecycle {
  #[instrument(level = Level::INFO, name = "acme2_autocert::renew", err, skip(self), fields(domain = %self.domain.main))]
  async fn renew(&self) -> Result<RenewalOutcome, Error> {
    let mut account = self.account.lock().await;
    self.renew_locked(&mut account).await
  }

  fn domain(&self) -> &str {
    &self.domain.main
  }
}

/// Keeps the TLS certificate of one domain issued, stored, and renewed.
///
/// Created with [`CertManager::initialize`]. Dropping the manager stops the
/// renewal scheduler; call [`CertManager::shutdown`] to also wait for
/// background work to finish.
pub struct CertManager {
  resolver: CertificateResolver,
  lifecycle: Option<Arc<Lifecycle>>,
  startup_renewal: Option<JoinHandle<()>>,
  scheduler: Option<RenewalHandle>,
}

impl CertManager {
  /// Bring up the certificate of `config.domain`.
  ///
  /// In self-signed mode a certificate is generated locally and nothing
  /// else happens. Otherwise the stored account is loaded (or a new one is
  /// created and registered with the authority), a first certificate is
  /// obtained if the account has none, and the renewal scheduler is
  /// started. An existing certificate is checked for renewal in the
  /// background, so this returns without waiting on the authority.
  ///
  /// Any failure before a certificate is available aborts initialization.
  #[instrument(level = Level::INFO, name = "acme2_autocert::CertManager::initialize", err, skip(config, providers), fields(domain = %config.domain.main))]
  pub async fn initialize(
    config: Config,
    providers: Providers,
  ) -> Result<CertManager, Error> {
    config.validate()?;
    if config.self_signed {
      return Self::self_signed(&config);
    }

    let factory = providers.client_factory.clone().ok_or_else(|| {
      Error::Configuration(
        "a validation client factory is required unless self-signed"
          .to_string(),
      )
    })?;
    let main = config.domain.main.clone();
    let timeout = config.network_timeout;

    let storage = providers.backends.init(&config.backend_name)?;
    let backend = storage.name().to_string();

    info!(backend = %backend, "Loading account");
    let loaded = bounded("account load", timeout, storage.load_account(&main))
      .await
      .map_err(|err| Error::backend(&backend, err))?
      .map_err(|err| err.into_load_error(&backend))?;

    let (mut account, needs_registration) = match loaded {
      Some(account) => {
        info!(backend = %backend, "Loaded account from storage");
        let dc = account.domain_certificate();
        if dc.domain() != &config.domain {
          warn!(
            stored = ?dc.domain(),
            configured = ?config.domain,
            "Stored domain differs from the configured one"
          );
        }
        if dc.certificate().has_material() {
          dc.init()?;
        }
        (account, false)
      }
      None => {
        info!("Generating account");
        let account = Account::new(
          config.email.clone(),
          config.domain.clone(),
          config.account_key_type,
        )?;
        (account, true)
      }
    };

    let identity = account.identity()?;
    let mut client = factory
      .build(config.authority_endpoint(), &identity, config.account_key_type)
      .map_err(Error::Client)?;
    client.exclude_challenges(&[ChallengeKind::Http01, ChallengeKind::TlsAlpn01]);
    let handler = providers
      .challenge_handlers
      .create(&config.challenge_handler)?;
    client.set_challenge_handler(ChallengeKind::Dns01, handler);
    let client: Arc<dyn ValidationClient> = Arc::from(client);

    if needs_registration {
      info!(email = %account.email, "Registering account");
      let registration = bounded("registration", timeout, client.register())
        .await
        .map_err(|err| Error::Registration(err.into()))?
        .map_err(Error::Registration)?;
      account.registration = Some(registration);

      bounded("terms agreement", timeout, client.agree_to_terms())
        .await
        .map_err(|err| Error::Registration(err.into()))?
        .map_err(Error::Registration)?;
    }

    let has_certificate =
      account.domain_certificate().certificate().has_material();
    let served = account.domain_certificate().served_cell();
    let lifecycle = Arc::new(Lifecycle {
      domain: config.domain.clone(),
      account: Mutex::new(account),
      client,
      storage,
      renew_before: config.renew_before,
      network_timeout: timeout,
      bundle_ca: config.bundle_ca,
    });

    let startup_renewal = if has_certificate {
      let lifecycle = lifecycle.clone();
      let span = info_span!("startup_renewal", domain = %main);
      Some(tokio::spawn(
        async move {
          match lifecycle.renew().await {
            Ok(outcome) => debug!(?outcome, "Startup renewal check finished"),
            Err(err) => error!(error = %err, "Error renewing certificate"),
          }
        }
        .instrument(span),
      ))
    } else {
      let mut account = lifecycle.account.lock().await;
      lifecycle.obtain(&mut account).await?;
      None
    };

    let resolver = CertificateResolver::new(&main, served);
    let scheduler =
      RenewalScheduler::new(lifecycle.clone(), config.renewal_interval)
        .spawn()?;
    info!("Loaded certificate");

    Ok(CertManager {
      resolver,
      lifecycle: Some(lifecycle),
      startup_renewal,
      scheduler: Some(scheduler),
    })
  }

  fn self_signed(config: &Config) -> Result<CertManager, Error> {
    info!("Generating self signed certificate");
    let served =
      generate_self_signed(&config.domain.main, config.self_signed_validity)?;
    let cell = Arc::new(ArcSwapOption::from_pointee(served));
    Ok(CertManager {
      resolver: CertificateResolver::new(&config.domain.main, cell),
      lifecycle: None,
      startup_renewal: None,
      scheduler: None,
    })
  }

  /// The resolver to consult during TLS handshakes.
  pub fn resolver(&self) -> CertificateResolver {
    self.resolver.clone()
  }

  /// A server acceptor presenting the managed certificate.
  pub fn acceptor(&self) -> Result<SslAcceptor, Error> {
    self.resolver.acceptor()
  }

  /// Run a renewal check now, serialized with the scheduler.
  pub async fn renew_now(&self) -> Result<RenewalOutcome, Error> {
    match &self.lifecycle {
      Some(lifecycle) => lifecycle.renew().await,
      None => Err(Error::Configuration(
        "self-signed certificates are not renewed".to_string(),
      )),
    }
  }

  /// Wait for the background renewal check started by
  /// [`initialize`](CertManager::initialize), if any.
  pub async fn wait_for_startup_renewal(&mut self) {
    if let Some(task) = self.startup_renewal.take() {
      if let Err(err) = task.await {
        error!(error = %err, "Startup renewal task failed");
      }
    }
  }

  /// Stop the renewal scheduler and wait for all background work.
  pub async fn shutdown(mut self) {
    if let Some(scheduler) = self.scheduler.take() {
      scheduler.shutdown().await;
    }
    self.wait_for_startup_renewal().await;
  }
}

impl std::fmt::Debug for CertManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CertManager")
      .field("resolver", &self.resolver)
      .field("self_signed", &self.lifecycle.is_none())
      .field("scheduler", &self.scheduler.is_some())
      .finish()
  }
}
