//! Fitness-tracking provider interface
//!
//! The provider senses real-world activity, owns the physical workout session
//! and persists the final workout record. The coordinator drives it through
//! [`WorkoutProvider`] and receives its push notifications through a
//! [`SessionEventSink`] attached to each session handle.

pub mod simulated;

pub use simulated::{ProviderCall, SimulatedProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::types::{CompletedWorkout, MetricSample, SessionStateChange, WorkoutConfiguration};

/// Provider-issued token for one physical workout attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: Uuid,
    pub configuration: WorkoutConfiguration,
}

impl SessionHandle {
    pub fn new(configuration: WorkoutConfiguration) -> Self {
        Self {
            id: Uuid::new_v4(),
            configuration,
        }
    }
}

/// Receiver for a session's push notifications.
///
/// Implementations must tolerate calls from any thread and must not block.
pub trait SessionEventSink: Send + Sync {
    fn state_changed(&self, change: SessionStateChange);
    fn samples_collected(&self, samples: &[MetricSample]);
}

/// External fitness-tracking provider
#[async_trait]
pub trait WorkoutProvider: Send + Sync {
    /// One-shot request for permission to read and write workout data
    async fn request_authorization(&self) -> Result<(), ProviderError>;

    async fn prepare(
        &self,
        configuration: &WorkoutConfiguration,
    ) -> Result<SessionHandle, ProviderError>;

    /// Route the handle's state-change and sample notifications to `sink`,
    /// replacing any previous subscription.
    fn attach(&self, handle: &SessionHandle, sink: Arc<dyn SessionEventSink>);

    async fn start(&self, handle: &SessionHandle, at: DateTime<Utc>) -> Result<(), ProviderError>;

    async fn pause(&self, handle: &SessionHandle) -> Result<(), ProviderError>;

    async fn resume(&self, handle: &SessionHandle) -> Result<(), ProviderError>;

    async fn stop(&self, handle: &SessionHandle, at: DateTime<Utc>) -> Result<(), ProviderError>;

    /// Active time according to the live collector's clock
    fn elapsed_time(&self, handle: &SessionHandle) -> Duration;

    /// Finish collection and persist the workout
    async fn finalize_collection(
        &self,
        handle: &SessionHandle,
    ) -> Result<CompletedWorkout, ProviderError>;
}
