//! In-process provider
//!
//! Keeps an active-time clock per session, echoes state transitions to the
//! attached sink the way a device provider does, and supports scripted
//! failures. Used by the `workout` CLI and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{SessionEventSink, SessionHandle, WorkoutProvider};
use crate::error::ProviderError;
use crate::types::{
    CompletedWorkout, MetricSample, SampleKind, SessionState, SessionStateChange,
    WorkoutConfiguration,
};

/// Provider operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
}

/// Call log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    RequestAuthorization,
    Prepare(WorkoutConfiguration),
    Attach(Uuid),
    Start(Uuid),
    Pause(Uuid),
    Resume(Uuid),
    Stop(Uuid),
    Finalize(Uuid),
}

#[derive(Debug, Default)]
struct ActiveClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ActiveClock {
    fn run(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn hold(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }
}

struct SimSession {
    handle: SessionHandle,
    sink: Option<Arc<dyn SessionEventSink>>,
    clock: ActiveClock,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    active_energy: Option<f64>,
    distance: Option<f64>,
    heart_rate_sum: f64,
    heart_rate_count: u32,
}

impl SimSession {
    fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            sink: None,
            clock: ActiveClock::default(),
            started_at: None,
            ended_at: None,
            active_energy: None,
            distance: None,
            heart_rate_sum: 0.0,
            heart_rate_count: 0,
        }
    }

    fn record(&mut self, sample: &MetricSample) {
        match sample.kind {
            SampleKind::HeartRate => {
                self.heart_rate_sum += sample.value;
                self.heart_rate_count += 1;
            }
            SampleKind::ActiveEnergyBurned => {
                self.active_energy = Some(self.active_energy.unwrap_or(0.0) + sample.value);
            }
            SampleKind::DistanceWalkingRunning
            | SampleKind::DistanceCycling
            | SampleKind::DistanceRowing
            | SampleKind::DistanceSwimming => {
                self.distance = Some(self.distance.unwrap_or(0.0) + sample.value);
            }
            SampleKind::CyclingSpeed | SampleKind::RowingSpeed | SampleKind::StepCount => {}
        }
    }

    fn completed(&self) -> CompletedWorkout {
        let ended_at = self.ended_at.unwrap_or_else(Utc::now);
        CompletedWorkout {
            id: self.handle.id,
            configuration: self.handle.configuration,
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
            duration: self.clock.elapsed(),
            total_active_energy_kcal: self.active_energy,
            total_distance_meters: self.distance,
            average_heart_rate_bpm: (self.heart_rate_count > 0)
                .then(|| self.heart_rate_sum / f64::from(self.heart_rate_count)),
        }
    }
}

#[derive(Default)]
struct SimState {
    sessions: HashMap<Uuid, SimSession>,
    current: Option<Uuid>,
    calls: Vec<ProviderCall>,
    denied: Option<String>,
    failures: HashMap<Operation, ProviderError>,
    finalize_failures: u32,
    manual_stop_confirmation: bool,
    prepare_delay: Duration,
    start_delay: Duration,
}

impl SimState {
    fn take_failure(&mut self, op: Operation) -> Result<(), ProviderError> {
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn session_mut(&mut self, handle: &SessionHandle) -> Result<&mut SimSession, ProviderError> {
        self.sessions
            .get_mut(&handle.id)
            .ok_or(ProviderError::UnknownSession(handle.id))
    }

    fn current_sink(&self) -> Option<Arc<dyn SessionEventSink>> {
        self.current
            .and_then(|id| self.sessions.get(&id))
            .and_then(|s| s.sink.clone())
    }
}

/// Simulated fitness-tracking provider
#[derive(Default)]
pub struct SimulatedProvider {
    state: Mutex<SimState>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deny every authorization request
    pub fn deny_authorization(&self, reason: &str) {
        self.lock().denied = Some(reason.to_string());
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: Operation, err: ProviderError) {
        self.lock().failures.insert(op, err);
    }

    /// Fail the next `times` finalization attempts
    pub fn fail_finalize(&self, times: u32) {
        self.lock().finalize_failures = times;
    }

    /// When set, `stop` only reports `Stopping`; call
    /// [`confirm_stop`](Self::confirm_stop) to report `Ended`.
    pub fn require_manual_stop_confirmation(&self, manual: bool) {
        self.lock().manual_stop_confirmation = manual;
    }

    /// Delay every `prepare` call
    pub fn set_prepare_delay(&self, delay: Duration) {
        self.lock().prepare_delay = delay;
    }

    /// Delay every `start` call
    pub fn set_start_delay(&self, delay: Duration) {
        self.lock().start_delay = delay;
    }

    /// Create a session that is already collecting, as found after an app relaunch
    pub fn begin_active_session(&self, configuration: WorkoutConfiguration) -> SessionHandle {
        let handle = SessionHandle::new(configuration);
        let mut session = SimSession::new(handle.clone());
        session.started_at = Some(Utc::now());
        session.clock.run();

        let mut state = self.lock();
        state.sessions.insert(handle.id, session);
        state.current = Some(handle.id);
        handle
    }

    /// Report a state change for the current session; false if nothing is attached
    pub fn emit_state(&self, new_state: SessionState) -> bool {
        let sink = self.lock().current_sink();
        match sink {
            Some(sink) => {
                sink.state_changed(SessionStateChange::now(new_state));
                true
            }
            None => false,
        }
    }

    /// Deliver a sample batch for the current session; false if nothing is attached
    pub fn emit_samples(&self, samples: &[MetricSample]) -> bool {
        let sink = {
            let mut state = self.lock();
            let Some(id) = state.current else {
                return false;
            };
            let Some(session) = state.sessions.get_mut(&id) else {
                return false;
            };
            for sample in samples {
                session.record(sample);
            }
            session.sink.clone()
        };

        match sink {
            Some(sink) => {
                sink.samples_collected(samples);
                true
            }
            None => false,
        }
    }

    /// Report that collection for the current session has ended
    pub fn confirm_stop(&self) -> bool {
        self.emit_state(SessionState::Ended)
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn transition(
        &self,
        handle: &SessionHandle,
        call: ProviderCall,
        op: Operation,
        apply: impl FnOnce(&mut SimSession),
    ) -> Result<Option<Arc<dyn SessionEventSink>>, ProviderError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.take_failure(op)?;
        let session = state.session_mut(handle)?;
        apply(session);
        Ok(session.sink.clone())
    }
}

#[async_trait]
impl WorkoutProvider for SimulatedProvider {
    async fn request_authorization(&self) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::RequestAuthorization);
        match &state.denied {
            Some(reason) => Err(ProviderError::AuthorizationDenied(reason.clone())),
            None => Ok(()),
        }
    }

    async fn prepare(
        &self,
        configuration: &WorkoutConfiguration,
    ) -> Result<SessionHandle, ProviderError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(ProviderCall::Prepare(*configuration));
            state.prepare_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.take_failure(Operation::Prepare)?;
        let handle = SessionHandle::new(*configuration);
        state
            .sessions
            .insert(handle.id, SimSession::new(handle.clone()));
        state.current = Some(handle.id);
        Ok(handle)
    }

    fn attach(&self, handle: &SessionHandle, sink: Arc<dyn SessionEventSink>) {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Attach(handle.id));
        if let Some(session) = state.sessions.get_mut(&handle.id) {
            session.sink = Some(sink);
        }
    }

    async fn start(&self, handle: &SessionHandle, at: DateTime<Utc>) -> Result<(), ProviderError> {
        let delay = self.lock().start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let sink = self.transition(handle, ProviderCall::Start(handle.id), Operation::Start, |s| {
            s.started_at = Some(at);
            s.clock.run();
        })?;
        if let Some(sink) = sink {
            sink.state_changed(SessionStateChange::now(SessionState::Running));
        }
        Ok(())
    }

    async fn pause(&self, handle: &SessionHandle) -> Result<(), ProviderError> {
        let sink = self.transition(handle, ProviderCall::Pause(handle.id), Operation::Pause, |s| {
            s.clock.hold()
        })?;
        if let Some(sink) = sink {
            sink.state_changed(SessionStateChange::now(SessionState::Paused));
        }
        Ok(())
    }

    async fn resume(&self, handle: &SessionHandle) -> Result<(), ProviderError> {
        let sink = self.transition(handle, ProviderCall::Resume(handle.id), Operation::Resume, |s| {
            s.clock.run()
        })?;
        if let Some(sink) = sink {
            sink.state_changed(SessionStateChange::now(SessionState::Running));
        }
        Ok(())
    }

    async fn stop(&self, handle: &SessionHandle, at: DateTime<Utc>) -> Result<(), ProviderError> {
        let sink = self.transition(handle, ProviderCall::Stop(handle.id), Operation::Stop, |s| {
            s.clock.hold();
            s.ended_at = Some(at);
        })?;
        let manual = self.lock().manual_stop_confirmation;

        if let Some(sink) = sink {
            sink.state_changed(SessionStateChange::now(SessionState::Stopping));
            if !manual {
                sink.state_changed(SessionStateChange::now(SessionState::Ended));
            }
        }
        Ok(())
    }

    fn elapsed_time(&self, handle: &SessionHandle) -> Duration {
        self.lock()
            .sessions
            .get(&handle.id)
            .map(|s| s.clock.elapsed())
            .unwrap_or_default()
    }

    async fn finalize_collection(
        &self,
        handle: &SessionHandle,
    ) -> Result<CompletedWorkout, ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Finalize(handle.id));
        if state.finalize_failures > 0 {
            state.finalize_failures -= 1;
            return Err(ProviderError::Failed("workout builder unavailable".to_string()));
        }
        let session = state.session_mut(handle)?;
        Ok(session.completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, Venue};

    #[derive(Default)]
    struct CollectingSink {
        states: Mutex<Vec<SessionState>>,
        samples: Mutex<usize>,
    }

    impl SessionEventSink for CollectingSink {
        fn state_changed(&self, change: SessionStateChange) {
            self.states.lock().unwrap().push(change.new_state);
        }

        fn samples_collected(&self, samples: &[MetricSample]) {
            *self.samples.lock().unwrap() += samples.len();
        }
    }

    fn running_outdoor() -> WorkoutConfiguration {
        WorkoutConfiguration::new(ActivityType::Running, Venue::Outdoor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_excludes_paused_time() {
        let provider = SimulatedProvider::new();
        let handle = provider.prepare(&running_outdoor()).await.unwrap();

        provider.start(&handle, Utc::now()).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        provider.pause(&handle).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        provider.resume(&handle).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(provider.elapsed_time(&handle), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_transitions_are_echoed_to_sink() {
        let provider = SimulatedProvider::new();
        let handle = provider.prepare(&running_outdoor()).await.unwrap();
        let sink = Arc::new(CollectingSink::default());
        provider.attach(&handle, sink.clone());

        provider.start(&handle, Utc::now()).await.unwrap();
        provider.pause(&handle).await.unwrap();
        provider.stop(&handle, Utc::now()).await.unwrap();

        assert_eq!(
            *sink.states.lock().unwrap(),
            vec![
                SessionState::Running,
                SessionState::Paused,
                SessionState::Stopping,
                SessionState::Ended,
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_failures_are_one_shot() {
        let provider = SimulatedProvider::new();
        provider.fail_next(Operation::Prepare, ProviderError::Unsupported("swim".into()));

        assert!(provider.prepare(&running_outdoor()).await.is_err());
        assert!(provider.prepare(&running_outdoor()).await.is_ok());
    }

    #[tokio::test]
    async fn test_finalize_totals() {
        let provider = SimulatedProvider::new();
        let handle = provider.prepare(&running_outdoor()).await.unwrap();
        provider.attach(&handle, Arc::new(CollectingSink::default()));
        provider.start(&handle, Utc::now()).await.unwrap();

        provider.emit_samples(&[
            MetricSample::new(SampleKind::HeartRate, 120.0),
            MetricSample::new(SampleKind::HeartRate, 140.0),
            MetricSample::new(SampleKind::ActiveEnergyBurned, 12.5),
            MetricSample::new(SampleKind::DistanceWalkingRunning, 400.0),
        ]);
        provider.stop(&handle, Utc::now()).await.unwrap();

        provider.fail_finalize(1);
        assert!(provider.finalize_collection(&handle).await.is_err());

        let workout = provider.finalize_collection(&handle).await.unwrap();
        assert_eq!(workout.id, handle.id);
        assert_eq!(workout.average_heart_rate_bpm, Some(130.0));
        assert_eq!(workout.total_active_energy_kcal, Some(12.5));
        assert_eq!(workout.total_distance_meters, Some(400.0));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let provider = SimulatedProvider::new();
        let stray = SessionHandle::new(running_outdoor());

        let err = provider.start(&stray, Utc::now()).await.unwrap_err();
        assert_eq!(err, ProviderError::UnknownSession(stray.id));
    }
}
