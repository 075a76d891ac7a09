//! Certificate finalization, decoupled from the decision path.
//!
//! The coordinator hands completed applications to a [`FinalizationSink`] once the
//! completing commit has landed. [`FinalizationService`] performs the idempotent
//! finalizer call and stamps the certificate reference; the queue/worker pair retries
//! with backoff, and the reconciliation sweep picks up anything a crash left behind.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::domain::{AggregateStatus, ApplicationId, CertificateReference};
use super::events::{publish_all, ClearanceEvent, EventPublisher};
use super::locks::KeyedLocks;
use super::repository::{ClearanceRepository, RepositoryError};

/// Outbound certificate issuer. Must be safe to call more than once per application.
pub trait CertificateFinalizer: Send + Sync {
    fn finalize(
        &self,
        application_id: &ApplicationId,
    ) -> Result<CertificateReference, FinalizerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizerError {
    #[error("certificate service unavailable: {0}")]
    Unavailable(String),
    #[error("certificate service refused application: {0}")]
    Refused(String),
}

/// Where the coordinator sends applications that just completed.
pub trait FinalizationSink: Send + Sync {
    fn request(&self, application_id: ApplicationId);
}

/// Exponential backoff for finalizer retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "certificate", rename_all = "snake_case")]
pub enum FinalizationOutcome {
    Issued(CertificateReference),
    AlreadyIssued(CertificateReference),
    /// Another attempt for the same application is running.
    InFlight,
    NotCompleted,
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizationError {
    #[error(transparent)]
    Finalizer(#[from] FinalizerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("application {0} not found")]
    NotFound(ApplicationId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub issued: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct InFlight<'a> {
    set: &'a Mutex<HashSet<ApplicationId>>,
    id: ApplicationId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct FinalizationService<R, E> {
    repository: Arc<R>,
    finalizer: Arc<dyn CertificateFinalizer>,
    events: Arc<E>,
    locks: Arc<KeyedLocks<ApplicationId>>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<ApplicationId>>,
}

impl<R, E> FinalizationService<R, E>
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    /// `locks` must be the table the coordinator serializes applications with.
    pub fn new(
        repository: Arc<R>,
        finalizer: Arc<dyn CertificateFinalizer>,
        events: Arc<E>,
        locks: Arc<KeyedLocks<ApplicationId>>,
    ) -> Self {
        Self {
            repository,
            finalizer,
            events,
            locks,
            clock: Arc::new(SystemClock),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn claim(&self, id: &ApplicationId) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(id.clone()).then(|| InFlight {
            set: &self.in_flight,
            id: id.clone(),
        })
    }

    /// Issue the certificate for a completed application, at most one call in flight.
    ///
    /// Applications that already carry a certificate reference are skipped without
    /// touching the finalizer.
    pub fn finalize(
        &self,
        application_id: &ApplicationId,
    ) -> Result<FinalizationOutcome, FinalizationError> {
        let Some(_claim) = self.claim(application_id) else {
            return Ok(FinalizationOutcome::InFlight);
        };

        let record = self
            .repository
            .fetch(application_id)?
            .ok_or_else(|| FinalizationError::NotFound(application_id.clone()))?;
        if record.status != AggregateStatus::Completed {
            return Ok(FinalizationOutcome::NotCompleted);
        }
        if let Some(existing) = record.certificate_reference {
            return Ok(FinalizationOutcome::AlreadyIssued(existing));
        }

        let certificate = self.finalizer.finalize(application_id)?;

        let outcome = self.locks.with(application_id, || -> Result<_, FinalizationError> {
            let mut record = self
                .repository
                .fetch(application_id)?
                .ok_or_else(|| FinalizationError::NotFound(application_id.clone()))?;
            if let Some(existing) = record.certificate_reference {
                return Ok(FinalizationOutcome::AlreadyIssued(existing));
            }
            record.certificate_reference = Some(certificate.clone());
            record.updated_at = self.clock.now();
            self.repository.update(record)?;
            Ok(FinalizationOutcome::Issued(certificate.clone()))
        })?;

        if let FinalizationOutcome::Issued(certificate) = &outcome {
            info!(%application_id, certificate = %certificate.0, "clearance certificate issued");
            publish_all(
                self.events.as_ref(),
                vec![ClearanceEvent::CertificateIssued {
                    application_id: application_id.clone(),
                    certificate: certificate.clone(),
                    at: self.clock.now(),
                }],
            );
        }

        Ok(outcome)
    }

    /// One reconciliation pass over completed applications missing a certificate.
    pub fn reconcile(&self, limit: usize) -> Result<ReconciliationReport, RepositoryError> {
        let pending = self.repository.awaiting_certificate(limit)?;
        let mut report = ReconciliationReport {
            examined: pending.len(),
            ..ReconciliationReport::default()
        };

        for record in pending {
            match self.finalize(&record.id) {
                Ok(FinalizationOutcome::Issued(_)) => report.issued += 1,
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(application_id = %record.id, error = %err, "reconciliation attempt failed");
                }
            }
        }

        Ok(report)
    }
}

/// Inline sink: finalizes on the caller's thread after the coordinator released its lock.
impl<R, E> FinalizationSink for FinalizationService<R, E>
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    fn request(&self, application_id: ApplicationId) {
        match self.finalize(&application_id) {
            Ok(outcome) => debug!(%application_id, ?outcome, "finalization attempted"),
            Err(err) => warn!(
                %application_id,
                error = %err,
                "finalization failed; left for reconciliation"
            ),
        }
    }
}

/// Sink backed by a channel drained by [`run_finalization_worker`].
#[derive(Debug, Clone)]
pub struct FinalizationQueue {
    sender: mpsc::UnboundedSender<ApplicationId>,
}

impl FinalizationQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApplicationId>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl FinalizationSink for FinalizationQueue {
    fn request(&self, application_id: ApplicationId) {
        if let Err(err) = self.sender.send(application_id) {
            warn!(application_id = %err.0, "finalization queue closed; left for reconciliation");
        }
    }
}

/// Drain the finalization queue until every sender is dropped, retrying each
/// application with backoff. Returns once all in-progress attempts finish.
pub async fn run_finalization_worker<R, E>(
    service: Arc<FinalizationService<R, E>>,
    mut receiver: mpsc::UnboundedReceiver<ApplicationId>,
    policy: RetryPolicy,
) where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    let mut attempts = JoinSet::new();
    while let Some(application_id) = receiver.recv().await {
        attempts.spawn(finalize_with_backoff(
            service.clone(),
            application_id,
            policy.clone(),
        ));
        while attempts.try_join_next().is_some() {}
    }
    while attempts.join_next().await.is_some() {}
}

async fn finalize_with_backoff<R, E>(
    service: Arc<FinalizationService<R, E>>,
    application_id: ApplicationId,
    policy: RetryPolicy,
) where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let worker_service = service.clone();
        let id = application_id.clone();
        let result = tokio::task::spawn_blocking(move || worker_service.finalize(&id)).await;

        match result {
            Ok(Ok(outcome)) => {
                debug!(%application_id, attempt, ?outcome, "finalization attempt finished");
                return;
            }
            Ok(Err(err)) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(%application_id, attempt, error = %err, ?delay, "retrying finalization");
                tokio::time::sleep(delay).await;
            }
            Ok(Err(err)) => {
                warn!(
                    %application_id,
                    attempts = attempt,
                    error = %err,
                    "finalization retries exhausted; left for reconciliation"
                );
            }
            Err(join_err) => {
                warn!(%application_id, error = %join_err, "finalization task aborted");
                return;
            }
        }
    }
}

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically re-attempt finalization for completed applications without a certificate.
pub async fn run_reconciliation<R, E>(
    service: Arc<FinalizationService<R, E>>,
    interval: Duration,
    batch: usize,
) where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    // `tokio::time::interval` panics on a zero period.
    let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
    loop {
        ticker.tick().await;
        let sweep_service = service.clone();
        match tokio::task::spawn_blocking(move || sweep_service.reconcile(batch)).await {
            Ok(Ok(report)) if report.examined > 0 => {
                info!(?report, "reconciliation sweep finished")
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "reconciliation sweep could not read repository"),
            Err(err) => warn!(error = %err, "reconciliation sweep aborted"),
        }
    }
}
