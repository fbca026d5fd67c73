//! Synheart Session - Live workout session coordination for on-device fitness tracking
//!
//! Session drives one workout at a time through its lifecycle against an
//! external fitness-tracking provider: configuration → preparation → running
//! ⇄ paused → stopping → finalization.
//!
//! ## Modules
//!
//! - **Coordinator**: Session state machine, provider event reconciliation and finalization
//! - **Dispatch**: Routing of provider sample kinds to live metric fields
//! - **Snapshot**: Live metrics aggregation and diagnostic formatting
//! - **Provider**: Provider interface and an in-process simulated provider

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod presence;
pub mod provider;
pub mod scheduler;
pub mod snapshot;
pub mod types;

pub use config::{CoordinatorConfig, FinalizeConfig};
pub use coordinator::WorkoutSessionCoordinator;
pub use error::{ConfigError, ProviderError, SessionError};
pub use provider::{SessionEventSink, SessionHandle, WorkoutProvider};
pub use snapshot::MetricsSnapshot;
pub use types::{
    ActivityType, CompletedWorkout, MetricSample, SampleKind, SessionState, SessionStateChange,
    Venue, WorkoutConfiguration,
};

/// Crate version reported by the CLI and diagnostics
pub const SESSION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-session";
