//! Keeps the local federation list in step with the registry.
//!
//! A [`SyncOrchestrator`] runs cycles: fetch the list newer than the stored
//! version, verify it, commit it to the [`LocalListStore`]. Cycles are triggered
//! by [`SyncOrchestrator::refresh_now`] or by the scheduler task started with
//! [`SyncOrchestrator::spawn`].
//!
//! # Examples
//!
//! ```no_run
//! use federation_sync::config::SyncConfig;
//! use federation_sync::store::InMemoryListStore;
//! use federation_sync::sync::SyncOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let store = Arc::new(InMemoryListStore::new());
//! let orchestrator = SyncOrchestrator::from_config(&config, store.clone())?;
//!
//! let handle = orchestrator.spawn();
//! // ...
//! handle.shutdown_configured().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::SyncConfig;
use crate::federation::{DomainEntry, FederationList, FederationListVerifier};
use crate::jws::{register_curves, CurveRegistryError};
use crate::ocsp::{HttpOcspResponder, OcspError, OcspRevocationChecker};
use crate::path::CertPathValidator;
use crate::prelude::{debug, info, warn};
use crate::registry::{DomainOutcome, FetchedList, RegistryClient, RegistryError};
use crate::store::{query_current, ListQuery, LocalListStore};
use crate::trust::{TrustAnchorSet, TrustStoreError};
use crate::verification::{InvalidReason, VerificationResult};
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod schedule;

pub use schedule::{CronSchedule, PollSchedule, DEFAULT_POLL_INTERVAL};

/// Phase of the running cycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum SyncState {
    /// No cycle is running.
    #[default]
    Idle,
    /// Authenticating and downloading the list.
    Fetching,
    /// Checking signature and certificate path.
    Verifying,
    /// Writing to the store.
    Committing,
}

impl SyncState {
    /// Returns a stable name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Committing => "committing",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CycleOutcome {
    /// The registry has nothing newer than the stored version.
    NotModified,
    /// Authentication or download failed; the next cycle tries again.
    FetchFailed(RegistryError),
    /// The downloaded list failed verification and was dropped.
    Rejected(InvalidReason),
    /// The list was stored.
    Committed {
        /// Version of the stored list.
        version: i64,
    },
    /// A concurrent cycle stored the same or a newer version first.
    Stale {
        /// Version of the downloaded list.
        received: i64,
        /// Version in the store.
        stored: Option<i64>,
    },
    /// The previous scheduled cycle was still running.
    Skipped,
}

impl CycleOutcome {
    /// Returns a stable name for logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotModified => "not_modified",
            Self::FetchFailed(_) => "fetch_failed",
            Self::Rejected(_) => "rejected",
            Self::Committed { .. } => "committed",
            Self::Stale { .. } => "stale",
            Self::Skipped => "skipped",
        }
    }
}

/// Errors returned when setting up or stopping synchronization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The trust store could not be loaded.
    #[error("failed to load trust store: {0}")]
    TrustStore(#[from] TrustStoreError),

    /// The crypto provider lacks a required curve.
    #[error(transparent)]
    Curves(#[from] CurveRegistryError),

    /// The OCSP client could not be built.
    #[error("failed to set up OCSP client: {0}")]
    Ocsp(#[from] OcspError),

    /// The registry client could not be built.
    #[error("failed to set up registry client: {0}")]
    Registry(#[from] RegistryError),

    /// The orchestrator was dropped.
    #[error("synchronizer closed")]
    Closed,

    /// The scheduler did not stop within the shutdown timeout and was aborted.
    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,
}

/// Receives [`SyncState`] transitions.
///
/// Slow receivers see only the latest state.
#[derive(Clone, Debug)]
pub struct SyncStateUpdates {
    rx: watch::Receiver<SyncState>,
}

impl SyncStateUpdates {
    /// Waits for the next transition and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] once the orchestrator is gone.
    pub async fn changed(&mut self) -> Result<SyncState, SyncError> {
        self.rx.changed().await.map_err(|_| SyncError::Closed)?;
        Ok(*self.rx.borrow_and_update())
    }

    /// Returns the current state without waiting.
    pub fn last(&self) -> SyncState {
        *self.rx.borrow()
    }

    /// Waits until the state satisfies `f`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] once the orchestrator is gone.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<SyncState, SyncError>
    where
        F: FnMut(&SyncState) -> bool,
    {
        let state = self
            .rx
            .wait_for(|state| f(state))
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(*state)
    }
}

/// Drives fetch, verify and commit cycles.
///
/// Cheap to clone; clones share the store, the clients and the scheduler lock.
#[derive(Clone, Debug)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: RegistryClient,
    verifier: FederationListVerifier,
    store: Arc<dyn LocalListStore>,

    schedule: PollSchedule,
    run_on_start: bool,
    shutdown_timeout: Option<Duration>,

    // Held for the duration of a scheduled cycle.
    scheduled: Arc<Mutex<()>>,
    state_tx: watch::Sender<SyncState>,
    // Cycles between `begin_cycle` and `end_cycle`; only changed under the
    // channel's write lock.
    active_cycles: AtomicUsize,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("registry", &self.registry)
            .field("verifier", &self.verifier)
            .field("store", &"<LocalListStore>")
            .field("schedule", &self.schedule)
            .field("run_on_start", &self.run_on_start)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("state", &*self.state_tx.borrow())
            .field("active_cycles", &self.active_cycles.load(Ordering::Relaxed))
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: SyncState) {
        self.state_tx.send_replace(state);
    }

    fn begin_cycle(&self) {
        self.state_tx.send_modify(|state| {
            self.active_cycles.fetch_add(1, Ordering::AcqRel);
            *state = SyncState::Fetching;
        });
    }

    // Publishes `Idle` only when no other cycle is still running.
    fn end_cycle(&self) {
        self.state_tx.send_if_modified(|state| {
            if self.active_cycles.fetch_sub(1, Ordering::AcqRel) != 1 {
                return false;
            }
            *state = SyncState::Idle;
            true
        });
    }
}

impl SyncOrchestrator {
    /// Creates a builder.
    pub fn builder(
        registry: RegistryClient,
        verifier: FederationListVerifier,
        store: Arc<dyn LocalListStore>,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder::new(registry, verifier, store)
    }

    /// Wires an orchestrator from configuration: loads the trust store,
    /// registers the curves and builds the HTTP clients.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] naming the component that could not be set up.
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn LocalListStore>,
    ) -> Result<Self, SyncError> {
        register_curves()?;

        let password = &config.trust_store.password;
        let anchors = TrustAnchorSet::load(
            &config.trust_store.path,
            (!password.is_empty()).then(|| password.expose()),
        )?;

        let revocation = &config.revocation;
        let responder = HttpOcspResponder::new(
            revocation.method,
            revocation.connect_timeout,
            revocation.timeout,
        )?;
        let mut validator = CertPathValidator::new(OcspRevocationChecker::new(Arc::new(responder)));
        if let Some(uri) = &revocation.responder_uri {
            validator = validator.with_responder_uri(uri.clone());
        }
        let verifier = FederationListVerifier::new(Arc::new(anchors), validator, revocation.enabled);

        let registry = RegistryClient::new(config.registry.clone())?;

        Ok(Self::builder(registry, verifier, store)
            .schedule(config.schedule.clone())
            .build())
    }

    /// The store the orchestrator commits to.
    pub fn store(&self) -> &Arc<dyn LocalListStore> {
        &self.inner.store
    }

    /// The stored list.
    pub fn current(&self) -> Option<Arc<FederationList>> {
        self.inner.store.current()
    }

    /// Serves the stored list to a caller holding version `if_newer_than`.
    pub fn query(&self, if_newer_than: Option<i64>) -> ListQuery {
        query_current(self.inner.store.as_ref(), if_newer_than)
    }

    /// Returns a receiver of state transitions.
    ///
    /// Manual and scheduled cycles may overlap. Their phases share the channel,
    /// and [`SyncState::Idle`] is published only once the last of them ends.
    pub fn state(&self) -> SyncStateUpdates {
        SyncStateUpdates {
            rx: self.inner.state_tx.subscribe(),
        }
    }

    /// Runs one cycle now, independent of the schedule.
    pub async fn refresh_now(&self) -> CycleOutcome {
        self.run_cycle().await
    }

    /// Runs one scheduled cycle, unless the previous one is still running.
    ///
    /// Returns [`CycleOutcome::Skipped`] in that case; skipped ticks are not
    /// queued.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(_guard) = self.inner.scheduled.try_lock() else {
            debug!("Scheduled federation list cycle still running; skipping tick");
            return CycleOutcome::Skipped;
        };
        self.run_cycle().await
    }

    /// Adds a domain at the registry.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the registry cannot be reached or
    /// authentication fails.
    pub async fn add_domain(&self, entry: &DomainEntry) -> Result<DomainOutcome, RegistryError> {
        let result = self.inner.registry.add_domain(entry).await;
        log_domain_result("add", entry.domain(), &result);
        result
    }

    /// Deletes a domain at the registry.
    ///
    /// # Errors
    ///
    /// See [`SyncOrchestrator::add_domain`].
    pub async fn delete_domain(&self, domain: &str) -> Result<DomainOutcome, RegistryError> {
        let result = self.inner.registry.delete_domain(domain).await;
        log_domain_result("delete", domain, &result);
        result
    }

    /// Starts the scheduler task.
    ///
    /// Must be called within a tokio runtime. The task stops when the returned
    /// handle is shut down or dropped.
    pub fn spawn(&self) -> SyncHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run_scheduler(cancel.clone()));
        SyncHandle {
            cancel,
            closed: AtomicBool::new(false),
            shutdown_timeout: self.inner.shutdown_timeout,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run_scheduler(self, cancel: CancellationToken) {
        info!(
            "Federation list scheduler started: schedule={}",
            self.inner.schedule
        );
        if self.inner.run_on_start {
            self.spawn_tick();
        }

        loop {
            let Some(delay) = self.inner.schedule.next_delay(Utc::now()) else {
                warn!("Poll schedule has no upcoming fire time; scheduler stops");
                break;
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => self.spawn_tick(),
            }
        }

        // A running cycle is never interrupted; wait for it to finish.
        let _guard = self.inner.scheduled.lock().await;
        info!("Federation list scheduler stopped");
    }

    fn spawn_tick(&self) {
        let Ok(guard) = Arc::clone(&self.inner.scheduled).try_lock_owned() else {
            debug!("Scheduled federation list cycle still running; skipping tick");
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_cycle().await;
        });
    }

    async fn run_cycle(&self) -> CycleOutcome {
        self.inner.begin_cycle();
        let outcome = self.fetch_verify_commit().await;
        self.inner.end_cycle();
        debug!("Federation list cycle finished: outcome={}", outcome.as_str());
        outcome
    }

    async fn fetch_verify_commit(&self) -> CycleOutcome {
        let inner = &self.inner;
        let since = inner.store.latest_version();

        let body = match inner.registry.fetch_list(since).await {
            Ok(FetchedList::Modified(body)) => body,
            Ok(FetchedList::NotModified) => {
                debug!("Federation list not modified: stored={since:?}");
                return CycleOutcome::NotModified;
            }
            Err(e) => {
                warn!("Federation list fetch failed; retrying on next tick: error={e}");
                return CycleOutcome::FetchFailed(e);
            }
        };

        inner.set_state(SyncState::Verifying);
        let list = match inner.verifier.verify(&body).await {
            VerificationResult::Valid(list) => list,
            VerificationResult::Invalid(reason) => {
                warn!(
                    "Federation list rejected: reason={}, detail={reason}",
                    reason.as_str()
                );
                return CycleOutcome::Rejected(reason);
            }
        };

        inner.set_state(SyncState::Committing);
        let received = list.version();
        if inner.store.replace_if_newer(list) {
            CycleOutcome::Committed { version: received }
        } else {
            CycleOutcome::Stale {
                received,
                stored: inner.store.latest_version(),
            }
        }
    }
}

fn log_domain_result(op: &str, domain: &str, result: &Result<DomainOutcome, RegistryError>) {
    match result {
        Ok(outcome) if outcome.is_success() => {
            info!("Registry {op} succeeded: domain={domain}, outcome={outcome}");
        }
        Ok(outcome) => {
            warn!("Registry {op} refused: domain={domain}, outcome={outcome}");
        }
        Err(e) => {
            warn!("Registry {op} failed: domain={domain}, error={e}");
        }
    }
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    registry: RegistryClient,
    verifier: FederationListVerifier,
    store: Arc<dyn LocalListStore>,
    schedule: PollSchedule,
    run_on_start: bool,
    shutdown_timeout: Option<Duration>,
}

impl fmt::Debug for SyncOrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestratorBuilder")
            .field("registry", &self.registry)
            .field("verifier", &self.verifier)
            .field("store", &"<LocalListStore>")
            .field("schedule", &self.schedule)
            .field("run_on_start", &self.run_on_start)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl SyncOrchestratorBuilder {
    /// Creates a builder polling every [`DEFAULT_POLL_INTERVAL`].
    pub fn new(
        registry: RegistryClient,
        verifier: FederationListVerifier,
        store: Arc<dyn LocalListStore>,
    ) -> Self {
        Self {
            registry,
            verifier,
            store,
            schedule: PollSchedule::default(),
            run_on_start: true,
            shutdown_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the poll schedule.
    #[must_use]
    pub fn schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Whether the scheduler runs a cycle as soon as it starts. Defaults to `true`.
    #[must_use]
    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Timeout used by [`SyncHandle::shutdown_configured`]; `None` waits
    /// indefinitely.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the orchestrator. No task is started until [`SyncOrchestrator::spawn`].
    pub fn build(self) -> SyncOrchestrator {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        SyncOrchestrator {
            inner: Arc::new(Inner {
                registry: self.registry,
                verifier: self.verifier,
                store: self.store,
                schedule: self.schedule,
                run_on_start: self.run_on_start,
                shutdown_timeout: self.shutdown_timeout,
                scheduled: Arc::new(Mutex::new(())),
                state_tx,
                active_cycles: AtomicUsize::new(0),
            }),
        }
    }
}

/// Handle of a running scheduler task.
///
/// Dropping the handle stops the scheduler after the running cycle.
pub struct SyncHandle {
    cancel: CancellationToken,
    closed: AtomicBool,
    shutdown_timeout: Option<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("cancel", &self.cancel)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("task", &"<Mutex<Option<JoinHandle<()>>>>")
            .finish()
    }
}

impl SyncHandle {
    /// Returns `true` until shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Stops the scheduler and waits for it, including a running cycle.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Error joining scheduler task during shutdown: error={e}");
            }
        }
    }

    /// Stops the scheduler, aborting it if it has not finished after `timeout`.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutdownTimeout`] if the task had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), SyncError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let Some(mut handle) = self.task.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Error joining scheduler task during shutdown: error={e}");
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded; aborting scheduler task");
                handle.abort();
                let _ = handle.await;
                Err(SyncError::ShutdownTimeout)
            }
        }
    }

    /// Stops the scheduler using the timeout configured on the builder.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutdownTimeout`] if the configured timeout is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), SyncError> {
        if let Some(timeout) = self.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::testing::{ec_key, CertBuilder};
    use crate::config::Secret;
    use crate::ocsp::testing::MockResponder;
    use crate::registry::RegistryConfig;
    use crate::store::InMemoryListStore;
    use openssl::nid::Nid;
    use url::Url;

    fn orchestrator(schedule: PollSchedule, run_on_start: bool) -> SyncOrchestrator {
        // Nothing listens on the discard port; no test here reaches the registry.
        let registry = RegistryClient::new(RegistryConfig::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            Url::parse("http://127.0.0.1:9/token").unwrap(),
            "client",
            Secret::new("secret"),
        ))
        .unwrap();

        let key = ec_key(Nid::BRAINPOOL_P256R1);
        let root = CertBuilder::new("Root", 1).ca(None).self_signed(&key);
        let anchors = Arc::new(TrustAnchorSet::new(vec![root]).unwrap());
        let validator =
            CertPathValidator::new(OcspRevocationChecker::new(Arc::new(MockResponder::default())));
        let verifier = FederationListVerifier::new(anchors, validator, false);

        SyncOrchestrator::builder(registry, verifier, Arc::new(InMemoryListStore::new()))
            .schedule(schedule)
            .run_on_start(run_on_start)
            .build()
    }

    #[tokio::test]
    async fn shutdown_between_cycles() {
        let orchestrator = orchestrator(PollSchedule::Interval(Duration::from_secs(3600)), false);
        let handle = orchestrator.spawn();
        assert!(handle.is_running());

        handle
            .shutdown_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!handle.is_running());

        // Idempotent.
        handle.shutdown_configured().await.unwrap();
        handle.shutdown().await;
        assert_eq!(orchestrator.state().last(), SyncState::Idle);
    }

    #[tokio::test]
    async fn scheduler_stops_when_schedule_is_exhausted() {
        let schedule = PollSchedule::cron("0 0 0 1 1 * 2001").unwrap();
        let handle = orchestrator(schedule, false).spawn();
        handle
            .shutdown_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tick_skips_while_a_scheduled_cycle_runs() {
        let orchestrator = orchestrator(PollSchedule::default(), false);
        let _held = orchestrator.inner.scheduled.lock().await;
        assert_eq!(orchestrator.tick().await, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn unreachable_registry_fails_the_cycle() {
        let orchestrator = orchestrator(PollSchedule::default(), false);
        let outcome = orchestrator.refresh_now().await;
        assert!(
            matches!(outcome, CycleOutcome::FetchFailed(RegistryError::TransientNetwork(_))),
            "{outcome:?}"
        );
        assert_eq!(orchestrator.state().last(), SyncState::Idle);
        assert_eq!(orchestrator.query(None), ListQuery::Empty);
    }

    #[tokio::test]
    async fn idle_waits_for_the_last_overlapping_cycle() {
        let orchestrator = orchestrator(PollSchedule::default(), false);
        let inner = &orchestrator.inner;
        let state = orchestrator.state();

        inner.begin_cycle();
        inner.begin_cycle();
        inner.set_state(SyncState::Verifying);

        inner.end_cycle();
        assert_eq!(state.last(), SyncState::Verifying);

        inner.end_cycle();
        assert_eq!(state.last(), SyncState::Idle);
    }

    #[test]
    fn builder_debug_hides_the_store() {
        let built = orchestrator(PollSchedule::default(), false);
        let builder = SyncOrchestrator::builder(
            built.inner.registry.clone(),
            built.inner.verifier.clone(),
            Arc::new(InMemoryListStore::new()),
        );
        let debug = format!("{builder:?}");
        assert!(debug.contains("<LocalListStore>"));
        assert!(debug.contains("run_on_start: true"));
    }

    #[test]
    fn names() {
        assert_eq!(SyncState::Committing.to_string(), "committing");
        assert_eq!(CycleOutcome::Committed { version: 1 }.as_str(), "committed");
        assert_eq!(CycleOutcome::Skipped.as_str(), "skipped");
    }
}
