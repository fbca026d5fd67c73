//! Workout session lifecycle coordinator
//!
//! Owns the session state machine, the serialized consumer of provider
//! state-change notifications, the metrics snapshot and the periodic
//! schedulers.
//!
//! ```text
//! NotStarted --configure--> Prepared --start--> Running <--pause/resume--> Paused
//!                                                  |                          |
//!                                                  +-----------end------------+
//!                                                              v
//!                                   Stopping --provider confirms, finalize--> Ended
//! ```
//!
//! `reset` returns to `NotStarted` from any state. `adopt` enters `Running`
//! directly with a session the provider already has in progress.
//!
//! Every prepare, adopt and reset bumps a generation counter. Provider
//! notifications and async continuations carry the generation they were
//! issued under and are dropped when it no longer matches.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{session_state_channel, StateConsumer, StatePublisher};
use crate::config::CoordinatorConfig;
use crate::dispatch::QuantityDispatchTable;
use crate::error::{ProviderError, SessionError};
use crate::presence::{DiagnosticSink, PresenceNotifier, TracingDiagnostics};
use crate::provider::{SessionEventSink, SessionHandle, WorkoutProvider};
use crate::scheduler::SchedulerSet;
use crate::snapshot::MetricsSnapshot;
use crate::types::{
    CompletedWorkout, MetricSample, SessionState, SessionStateChange, WorkoutConfiguration,
};

#[derive(Debug, Clone, Copy)]
struct StampedChange {
    generation: u64,
    change: SessionStateChange,
}

#[derive(Debug, Default)]
struct Session {
    state: SessionState,
    generation: u64,
    configuration: Option<WorkoutConfiguration>,
    handle: Option<SessionHandle>,
    snapshot: MetricsSnapshot,
    schedulers: Option<SchedulerSet>,
    completed: Option<CompletedWorkout>,
    finalize_error: Option<String>,
    preparing: bool,
    starting: bool,
    finalizing: bool,
    ended_notified: bool,
}

impl Session {
    fn stop_schedulers(&mut self) {
        if let Some(schedulers) = self.schedulers.take() {
            schedulers.stop();
        }
    }
}

struct Inner {
    provider: Arc<dyn WorkoutProvider>,
    presence: Arc<dyn PresenceNotifier>,
    diagnostics: Arc<dyn DiagnosticSink>,
    table: QuantityDispatchTable,
    config: CoordinatorConfig,
    session: Mutex<Session>,
    /// Mirror of `Session::generation` readable without the lock
    generation: AtomicU64,
    authorized: AtomicBool,
    publisher: StatePublisher<StampedChange>,
    state_tx: watch::Sender<SessionState>,
    shutdown: CancellationToken,
}

/// Coordinates one workout session at a time.
///
/// Must be created inside a Tokio runtime; the state-change consumer loop is
/// spawned on construction and stopped by [`shutdown`](Self::shutdown) or drop.
pub struct WorkoutSessionCoordinator {
    inner: Arc<Inner>,
    consumer: JoinHandle<()>,
}

impl WorkoutSessionCoordinator {
    pub fn new(
        provider: Arc<dyn WorkoutProvider>,
        presence: Arc<dyn PresenceNotifier>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_diagnostics(provider, presence, Arc::new(TracingDiagnostics), config)
    }

    pub fn with_diagnostics(
        provider: Arc<dyn WorkoutProvider>,
        presence: Arc<dyn PresenceNotifier>,
        diagnostics: Arc<dyn DiagnosticSink>,
        config: CoordinatorConfig,
    ) -> Self {
        let (publisher, consumer) = session_state_channel();
        let (state_tx, _) = watch::channel(SessionState::NotStarted);
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            provider,
            presence,
            diagnostics,
            table: QuantityDispatchTable::standard(),
            config,
            session: Mutex::new(Session::default()),
            generation: AtomicU64::new(0),
            authorized: AtomicBool::new(false),
            publisher,
            state_tx,
            shutdown: shutdown.clone(),
        });

        let consumer = tokio::spawn(run_consumer(Arc::downgrade(&inner), consumer, shutdown));

        Self { inner, consumer }
    }

    /// Select a workout and ask the provider to prepare it.
    ///
    /// On provider failure the coordinator stays in `NotStarted`. If the
    /// coordinator is reset while the provider is preparing, the prepared
    /// handle is discarded and `Ok(())` is returned.
    pub async fn set_configuration(
        &self,
        configuration: WorkoutConfiguration,
    ) -> Result<(), SessionError> {
        self.inner.prepare(configuration).await
    }

    /// Start the prepared session
    pub async fn start(&self) -> Result<(), SessionError> {
        self.inner.start().await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.inner.pause().await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.inner.resume().await
    }

    /// Ask the provider to stop. A no-op once `Stopping` or `Ended`.
    pub async fn end(&self) -> Result<(), SessionError> {
        self.inner.end().await
    }

    /// Take over a session the provider already has in progress
    pub fn adopt(&self, handle: SessionHandle) -> Result<(), SessionError> {
        self.inner.adopt(handle)
    }

    /// Discard the session, its configuration and snapshot. Always succeeds.
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Re-attempt finalization while stuck in `Stopping`
    pub async fn retry_finalization(&self) -> Result<(), SessionError> {
        self.inner.retry_finalization().await
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Copy of the current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot
    }

    pub fn completed_workout(&self) -> Option<CompletedWorkout> {
        self.inner.lock().completed.clone()
    }

    pub fn configuration(&self) -> Option<WorkoutConfiguration> {
        self.inner.lock().configuration
    }

    pub fn has_session_handle(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    pub fn schedulers_active(&self) -> bool {
        self.inner
            .lock()
            .schedulers
            .as_ref()
            .is_some_and(SchedulerSet::is_running)
    }

    /// Last finalization failure, set while waiting for a manual retry
    pub fn finalization_error(&self) -> Option<String> {
        self.inner.lock().finalize_error.clone()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn dispatch_table(&self) -> &QuantityDispatchTable {
        &self.inner.table
    }

    /// Stop the consumer loop and both schedulers
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.lock().stop_schedulers();
    }
}

impl Drop for WorkoutSessionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
        self.consumer.abort();
    }
}

async fn run_consumer(
    inner: Weak<Inner>,
    mut events: StateConsumer<StampedChange>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = inner.upgrade() else { break };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = inner.handle_state_change(event) => {}
        }
    }
    debug!("state-change consumer stopped");
}

/// Whether a change from `generation` may take the channel slot.
///
/// Evaluated under the channel lock: a superseded session must never
/// displace a pending change from a newer one.
fn admits_change(current: u64, generation: u64, pending: Option<&StampedChange>) -> bool {
    current == generation && pending.map_or(true, |p| p.generation <= generation)
}

/// Sink handed to the provider for one session generation
struct SessionIngress {
    generation: u64,
    publisher: StatePublisher<StampedChange>,
    inner: Weak<Inner>,
}

impl SessionEventSink for SessionIngress {
    fn state_changed(&self, change: SessionStateChange) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let generation = self.generation;
        let stamped = StampedChange { generation, change };
        let published = self.publisher.publish_if(stamped, |pending| {
            admits_change(inner.generation.load(Ordering::Acquire), generation, pending)
        });
        if !published {
            debug!(generation, state = %change.new_state, "dropping superseded state change");
        }
    }

    fn samples_collected(&self, samples: &[MetricSample]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_samples(self.generation, samples);
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Shutdown);
        }
        Ok(())
    }

    fn enter(&self, session: &mut Session, next: SessionState) {
        if session.state != next {
            info!(
                from = %session.state,
                to = %next,
                generation = session.generation,
                "session state changed"
            );
            session.state = next;
            self.state_tx.send_replace(next);
        }
    }

    fn notify_started(&self, generation: u64, activity_symbol: &str) {
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(generation, "skipping presence start for a superseded session");
            return;
        }
        self.presence.started(activity_symbol);
    }

    fn bump_generation(&self, session: &mut Session) -> u64 {
        session.generation += 1;
        self.generation.store(session.generation, Ordering::Release);
        session.generation
    }

    fn ingress(self: &Arc<Self>, generation: u64) -> Arc<dyn SessionEventSink> {
        Arc::new(SessionIngress {
            generation,
            publisher: self.publisher.clone(),
            inner: Arc::downgrade(self),
        })
    }

    fn start_schedulers(self: &Arc<Self>, session: &mut Session) {
        let generation = session.generation;
        let refresh = {
            let weak = Arc::downgrade(self);
            move || match weak.upgrade() {
                Some(inner) => inner.refresh_tick(generation),
                None => ControlFlow::Break(()),
            }
        };
        let diagnostic = {
            let weak = Arc::downgrade(self);
            move || match weak.upgrade() {
                Some(inner) => inner.diagnostic_tick(generation),
                None => ControlFlow::Break(()),
            }
        };

        session.schedulers = Some(SchedulerSet::spawn(
            self.config.refresh_interval(),
            self.config.diagnostic_interval(),
            refresh,
            diagnostic,
        ));
    }

    fn running_handle(&self, generation: u64) -> Option<SessionHandle> {
        let session = self.lock();
        if session.generation != generation || session.state != SessionState::Running {
            return None;
        }
        session.handle.clone()
    }

    fn refresh_tick(&self, generation: u64) -> ControlFlow<()> {
        let Some(handle) = self.running_handle(generation) else {
            return ControlFlow::Break(());
        };
        let elapsed = self.provider.elapsed_time(&handle);

        let snapshot = {
            let mut session = self.lock();
            if session.generation != generation || session.state != SessionState::Running {
                return ControlFlow::Break(());
            }
            session.snapshot.elapsed_time = elapsed;
            session.snapshot
        };
        self.presence.updated(snapshot);
        ControlFlow::Continue(())
    }

    fn diagnostic_tick(&self, generation: u64) -> ControlFlow<()> {
        let snapshot = {
            let session = self.lock();
            if session.generation != generation || session.state != SessionState::Running {
                return ControlFlow::Break(());
            }
            session.snapshot
        };
        self.diagnostics.record(snapshot);
        ControlFlow::Continue(())
    }

    fn apply_samples(&self, generation: u64, samples: &[MetricSample]) {
        let mut session = self.lock();
        if session.generation != generation {
            debug!(generation, "dropping samples from superseded session");
            return;
        }
        if !matches!(
            session.state,
            SessionState::Running | SessionState::Paused | SessionState::Stopping
        ) {
            return;
        }
        let Some(configuration) = session.configuration else {
            return;
        };
        let applied =
            session
                .snapshot
                .apply_samples(&self.table, configuration.activity_type, samples);
        debug!(received = samples.len(), applied, "applied metric samples");
    }

    async fn authorize(&self) -> Result<(), ProviderError> {
        if self.authorized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.provider.request_authorization().await?;
        self.authorized.store(true, Ordering::Release);
        Ok(())
    }

    async fn prepare(
        self: &Arc<Self>,
        configuration: WorkoutConfiguration,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let generation = {
            let mut session = self.lock();
            if session.state != SessionState::NotStarted || session.preparing {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "configure",
                });
            }
            session.preparing = true;
            session.configuration = Some(configuration);
            self.bump_generation(&mut session)
        };

        let prepared = match self.authorize().await {
            Ok(()) => self.provider.prepare(&configuration).await,
            Err(e) => Err(e),
        };

        let handle = match prepared {
            Ok(handle) => handle,
            Err(e) => {
                let mut session = self.lock();
                if session.generation == generation {
                    session.preparing = false;
                    session.configuration = None;
                }
                warn!(%configuration, error = %e, "workout preparation failed");
                return Err(SessionError::Preparation(e));
            }
        };

        {
            let mut session = self.lock();
            if session.generation != generation {
                debug!(generation, "discarding handle prepared for a superseded session");
                return Ok(());
            }
            session.preparing = false;
            let capabilities = self.table.capabilities(&configuration);
            session.snapshot = MetricsSnapshot::with_capabilities(capabilities);
            session.handle = Some(handle.clone());
            self.enter(&mut session, SessionState::Prepared);
        }

        self.provider.attach(&handle, self.ingress(generation));
        Ok(())
    }

    async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let (handle, generation) = {
            let mut session = self.lock();
            if session.state != SessionState::Prepared || session.starting {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "start",
                });
            }
            let handle = session.handle.clone().ok_or(SessionError::NoActiveSession)?;
            session.starting = true;
            (handle, session.generation)
        };

        let result = self.provider.start(&handle, Utc::now()).await;

        {
            let mut session = self.lock();
            if session.generation != generation {
                debug!(generation, "dropping start result for a superseded session");
                return Ok(());
            }
            session.starting = false;
            if let Err(e) = result {
                warn!(error = %e, "provider failed to start workout");
                return Err(SessionError::Provider(e));
            }
            self.enter(&mut session, SessionState::Running);
            self.start_schedulers(&mut session);
        }

        self.notify_started(generation, handle.configuration.activity_type.symbol());
        Ok(())
    }

    async fn pause(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let (handle, generation) = {
            let mut session = self.lock();
            if session.state != SessionState::Running {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "pause",
                });
            }
            let handle = session.handle.clone().ok_or(SessionError::NoActiveSession)?;
            self.enter(&mut session, SessionState::Paused);
            session.stop_schedulers();
            (handle, session.generation)
        };

        if let Err(e) = self.provider.pause(&handle).await {
            let mut session = self.lock();
            if session.generation == generation && session.state == SessionState::Paused {
                self.enter(&mut session, SessionState::Running);
                self.start_schedulers(&mut session);
            }
            warn!(error = %e, "provider failed to pause workout");
            return Err(SessionError::Provider(e));
        }
        Ok(())
    }

    async fn resume(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let (handle, generation) = {
            let mut session = self.lock();
            if session.state != SessionState::Paused {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "resume",
                });
            }
            let handle = session.handle.clone().ok_or(SessionError::NoActiveSession)?;
            self.enter(&mut session, SessionState::Running);
            self.start_schedulers(&mut session);
            (handle, session.generation)
        };

        if let Err(e) = self.provider.resume(&handle).await {
            let mut session = self.lock();
            if session.generation == generation && session.state == SessionState::Running {
                self.enter(&mut session, SessionState::Paused);
                session.stop_schedulers();
            }
            warn!(error = %e, "provider failed to resume workout");
            return Err(SessionError::Provider(e));
        }
        Ok(())
    }

    async fn end(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let (handle, generation, previous) = {
            let mut session = self.lock();
            match session.state {
                SessionState::Stopping | SessionState::Ended => return Ok(()),
                state if state.is_active() => {}
                state => {
                    return Err(SessionError::InvalidTransition {
                        state,
                        action: "end",
                    })
                }
            }
            let handle = session.handle.clone().ok_or(SessionError::NoActiveSession)?;
            let previous = session.state;
            self.enter(&mut session, SessionState::Stopping);
            session.stop_schedulers();
            (handle, session.generation, previous)
        };

        if let Err(e) = self.provider.stop(&handle, Utc::now()).await {
            let mut session = self.lock();
            if session.generation == generation
                && session.state == SessionState::Stopping
                && !session.finalizing
            {
                self.enter(&mut session, previous);
                if previous == SessionState::Running {
                    self.start_schedulers(&mut session);
                }
            }
            warn!(error = %e, "provider failed to stop workout");
            return Err(SessionError::Provider(e));
        }
        Ok(())
    }

    fn adopt(self: &Arc<Self>, handle: SessionHandle) -> Result<(), SessionError> {
        self.ensure_open()?;
        let configuration = handle.configuration;
        let generation = {
            let mut session = self.lock();
            if session.state != SessionState::NotStarted || session.preparing {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "adopt",
                });
            }
            let generation = self.bump_generation(&mut session);
            session.configuration = Some(configuration);
            let capabilities = self.table.capabilities(&configuration);
            session.snapshot = MetricsSnapshot::with_capabilities(capabilities);
            session.handle = Some(handle.clone());
            self.enter(&mut session, SessionState::Running);
            self.start_schedulers(&mut session);
            generation
        };

        info!(session = %handle.id, %configuration, "adopted active provider session");
        self.provider.attach(&handle, self.ingress(generation));
        self.notify_started(generation, configuration.activity_type.symbol());
        Ok(())
    }

    fn reset(&self) {
        let mut session = self.lock();
        let generation = self.bump_generation(&mut session);
        let discarded = std::mem::replace(
            &mut *session,
            Session {
                generation,
                ..Session::default()
            },
        );
        self.state_tx.send_replace(SessionState::NotStarted);
        drop(session);

        info!(from = %discarded.state, generation, "session reset");
    }

    async fn handle_state_change(self: &Arc<Self>, event: StampedChange) {
        let new_state = event.change.new_state;
        let finalize = {
            let mut session = self.lock();
            if session.generation != event.generation {
                debug!(generation = event.generation, state = %new_state, "dropping superseded state change");
                return;
            }

            match (new_state, session.state) {
                (SessionState::Paused, SessionState::Running) => {
                    self.enter(&mut session, SessionState::Paused);
                    session.stop_schedulers();
                    None
                }
                (SessionState::Running, SessionState::Paused) => {
                    self.enter(&mut session, SessionState::Running);
                    self.start_schedulers(&mut session);
                    None
                }
                (SessionState::Stopping, SessionState::Running | SessionState::Paused) => {
                    self.enter(&mut session, SessionState::Stopping);
                    session.stop_schedulers();
                    None
                }
                (
                    SessionState::Ended,
                    SessionState::Running | SessionState::Paused | SessionState::Stopping,
                ) if !session.finalizing => {
                    self.enter(&mut session, SessionState::Stopping);
                    session.stop_schedulers();
                    session.finalizing = true;
                    session.finalize_error = None;
                    session.handle.clone()
                }
                (new_state, current) => {
                    debug!(reported = %new_state, %current, "ignoring provider state change");
                    None
                }
            }
        };

        if let Some(handle) = finalize {
            // Failure is recorded on the session for a manual retry
            let _ = self.finalize(handle, event.generation).await;
        }
    }

    async fn retry_finalization(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let (handle, generation) = {
            let mut session = self.lock();
            if session.state != SessionState::Stopping || session.finalizing {
                return Err(SessionError::InvalidTransition {
                    state: session.state,
                    action: "retry finalization",
                });
            }
            let handle = session.handle.clone().ok_or(SessionError::NoActiveSession)?;
            session.finalizing = true;
            session.finalize_error = None;
            (handle, session.generation)
        };
        self.finalize(handle, generation).await
    }

    /// Finalize with bounded retries; on exhaustion stay in `Stopping`
    async fn finalize(&self, handle: SessionHandle, generation: u64) -> Result<(), SessionError> {
        let policy = &self.config.finalize;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.provider.finalize_collection(&handle).await {
                Ok(workout) => {
                    self.complete(generation, workout);
                    return Ok(());
                }
                Err(e) => {
                    if self.generation.load(Ordering::Acquire) != generation {
                        debug!(generation, "dropping finalization for a superseded session");
                        return Ok(());
                    }
                    warn!(attempt, max_attempts = policy.max_attempts, error = %e, "finalization attempt failed");

                    if attempt >= policy.max_attempts {
                        let message = e.to_string();
                        let mut session = self.lock();
                        if session.generation == generation {
                            session.finalizing = false;
                            session.finalize_error = Some(message.clone());
                        }
                        error!(
                            session = %handle.id,
                            attempts = attempt,
                            "finalization failed; workout data may be lost unless retried"
                        );
                        return Err(SessionError::Finalization {
                            attempts: attempt,
                            message,
                        });
                    }
                    tokio::time::sleep(policy.backoff_after(attempt)).await;
                }
            }
        }
    }

    fn complete(&self, generation: u64, workout: CompletedWorkout) {
        let notify = {
            let mut session = self.lock();
            if session.generation != generation {
                debug!(generation, "dropping completed workout for a superseded session");
                return;
            }
            info!(
                workout = %workout.id,
                duration_secs = workout.duration.as_secs(),
                "workout finalized"
            );
            session.completed = Some(workout);
            session.finalizing = false;
            session.finalize_error = None;
            self.enter(&mut session, SessionState::Ended);
            !std::mem::replace(&mut session.ended_notified, true)
        };

        if notify {
            self.presence.ended();
        }
    }
}
