use crate::error::Error;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing_futures::Instrument;

/// The result of a renewal attempt that did not fail.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RenewalOutcome {
  /// The certificate is not due for renewal; the authority was not
  /// contacted.
  Skipped,
  /// A new certificate was issued and published.
  Renewed,
}

/// Something whose certificate can be renewed on a schedule.
#[async_trait]
pub trait Renew: Send + Sync {
  /// Renew the certificate if it is due.
  async fn renew(&self) -> Result<RenewalOutcome, Error>;

  /// The primary domain, for logging.
  fn domain(&self) -> &str;
}

/// Periodically invokes [`Renew::renew`].
///
/// The first attempt happens one full interval after the scheduler starts.
/// Failures are logged and retried on the next tick; the previously
/// published certificate keeps being served meanwhile.
pub struct RenewalScheduler {
  target: Arc<dyn Renew>,
  interval: Duration,
}

impl RenewalScheduler {
  pub fn new(target: Arc<dyn Renew>, interval: Duration) -> Self {
    RenewalScheduler { target, interval }
  }

  /// Start the scheduler on the current Tokio runtime. Fails with
  /// [`Error::Configuration`] if the interval cannot be added to the current
  /// time.
  pub fn spawn(self) -> Result<RenewalHandle, Error> {
    let start = Instant::now().checked_add(self.interval).ok_or_else(|| {
      Error::Configuration(format!(
        "renewal interval {:?} is out of range",
        self.interval
      ))
    })?;
    let (shutdown, signal) = watch::channel(false);
    let span = info_span!("renewal_scheduler", domain = %self.target.domain());
    let task = tokio::spawn(self.run(start, signal).instrument(span));
    Ok(RenewalHandle { shutdown, task })
  }

  async fn run(self, start: Instant, mut shutdown: watch::Receiver<bool>) {
    info!(interval = ?self.interval, "Starting certificate renewal scheduler");

    let mut ticker = interval_at(start, self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
          continue;
        }
      }

      debug!("Running scheduled certificate renewal check");
      match self.target.renew().await {
        Ok(RenewalOutcome::Renewed) => info!("Certificate renewed"),
        Ok(RenewalOutcome::Skipped) => debug!("Certificate is still valid"),
        Err(err) => error!(error = %err, "Error renewing certificate"),
      }
    }

    info!("Certificate renewal scheduler stopped");
  }
}

/// Owns a running [`RenewalScheduler`]. Dropping the handle also stops the
/// scheduler, after any renewal in progress.
#[derive(Debug)]
pub struct RenewalHandle {
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl RenewalHandle {
  /// Stop the scheduler and wait for it to finish. A renewal in progress is
  /// completed first.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(true);
    if let Err(err) = self.task.await {
      error!(error = %err, "Renewal scheduler task failed");
    }
  }
}
