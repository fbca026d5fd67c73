//! Core types for workout sessions
//!
//! This module defines the value objects that flow between the host
//! application, the coordinator and the fitness-tracking provider:
//! workout configurations, session states, metric samples and the completed
//! workout record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kind of physical activity being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Walking,
    Running,
    Hiking,
    Cycling,
    Rowing,
    Swimming,
    Elliptical,
    StairClimbing,
    StrengthTraining,
    HighIntensityIntervalTraining,
    Yoga,
    Other,
}

impl ActivityType {
    pub const ALL: [ActivityType; 12] = [
        ActivityType::Walking,
        ActivityType::Running,
        ActivityType::Hiking,
        ActivityType::Cycling,
        ActivityType::Rowing,
        ActivityType::Swimming,
        ActivityType::Elliptical,
        ActivityType::StairClimbing,
        ActivityType::StrengthTraining,
        ActivityType::HighIntensityIntervalTraining,
        ActivityType::Yoga,
        ActivityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::Hiking => "hiking",
            ActivityType::Cycling => "cycling",
            ActivityType::Rowing => "rowing",
            ActivityType::Swimming => "swimming",
            ActivityType::Elliptical => "elliptical",
            ActivityType::StairClimbing => "stair_climbing",
            ActivityType::StrengthTraining => "strength_training",
            ActivityType::HighIntensityIntervalTraining => "hiit",
            ActivityType::Yoga => "yoga",
            ActivityType::Other => "other",
        }
    }

    /// Symbol name shown by the companion presence surface
    pub fn symbol(&self) -> &'static str {
        match self {
            ActivityType::Walking => "figure.walk",
            ActivityType::Running => "figure.run",
            ActivityType::Hiking => "figure.hiking",
            ActivityType::Cycling => "figure.outdoor.cycle",
            ActivityType::Rowing => "figure.rower",
            ActivityType::Swimming => "figure.pool.swim",
            ActivityType::Elliptical => "figure.elliptical",
            ActivityType::StairClimbing => "figure.stair.stepper",
            ActivityType::StrengthTraining => "figure.strengthtraining.traditional",
            ActivityType::HighIntensityIntervalTraining => "figure.highintensity.intervaltraining",
            ActivityType::Yoga => "figure.yoga",
            ActivityType::Other => "figure.mixed.cardio",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the workout takes place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Indoor,
    Outdoor,
    #[default]
    Unspecified,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Indoor => "indoor",
            Venue::Outdoor => "outdoor",
            Venue::Unspecified => "unspecified",
        }
    }
}

/// Immutable descriptor of a selectable workout option.
///
/// Two configurations with equal fields are the same option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkoutConfiguration {
    pub activity_type: ActivityType,
    #[serde(default)]
    pub venue: Venue,
}

impl WorkoutConfiguration {
    pub fn new(activity_type: ActivityType, venue: Venue) -> Self {
        Self {
            activity_type,
            venue,
        }
    }
}

impl fmt::Display for WorkoutConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.activity_type, self.venue.as_str())
    }
}

/// Lifecycle state of a workout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NotStarted,
    Prepared,
    Running,
    Paused,
    Stopping,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "not_started",
            SessionState::Prepared => "prepared",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Ended => "ended",
        }
    }

    /// Whether the provider is actively collecting for this state
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-change notification emitted by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStateChange {
    pub new_state: SessionState,
    pub timestamp: DateTime<Utc>,
}

impl SessionStateChange {
    pub fn new(new_state: SessionState, timestamp: DateTime<Utc>) -> Self {
        Self {
            new_state,
            timestamp,
        }
    }

    pub fn now(new_state: SessionState) -> Self {
        Self::new(new_state, Utc::now())
    }
}

/// Kind of quantity carried by a provider sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    HeartRate,
    ActiveEnergyBurned,
    DistanceWalkingRunning,
    DistanceCycling,
    DistanceRowing,
    DistanceSwimming,
    CyclingSpeed,
    RowingSpeed,
    StepCount,
}

impl SampleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::HeartRate => "heart_rate",
            SampleKind::ActiveEnergyBurned => "active_energy_burned",
            SampleKind::DistanceWalkingRunning => "distance_walking_running",
            SampleKind::DistanceCycling => "distance_cycling",
            SampleKind::DistanceRowing => "distance_rowing",
            SampleKind::DistanceSwimming => "distance_swimming",
            SampleKind::CyclingSpeed => "cycling_speed",
            SampleKind::RowingSpeed => "rowing_speed",
            SampleKind::StepCount => "step_count",
        }
    }
}

/// A single metric sample delivered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub kind: SampleKind,
    /// Value in the kind's canonical unit (bpm, kcal, meters, m/s)
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(kind: SampleKind, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Finalized workout record produced by the provider once collection ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWorkout {
    pub id: Uuid,
    pub configuration: WorkoutConfiguration,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Active duration, excluding paused intervals
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub total_active_energy_kcal: Option<f64>,
    pub total_distance_meters: Option<f64>,
    pub average_heart_rate_bpm: Option<f64>,
}

/// Serializes a `Duration` as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_configurations_are_same_option() {
        let a = WorkoutConfiguration::new(ActivityType::Running, Venue::Outdoor);
        let b = WorkoutConfiguration::new(ActivityType::Running, Venue::Outdoor);
        let c = WorkoutConfiguration::new(ActivityType::Running, Venue::Indoor);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_configuration_venue_defaults_to_unspecified() {
        let config: WorkoutConfiguration =
            serde_json::from_str(r#"{"activity_type": "rowing"}"#).unwrap();

        assert_eq!(config.activity_type, ActivityType::Rowing);
        assert_eq!(config.venue, Venue::Unspecified);
    }

    #[test]
    fn test_session_state_activity() {
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Paused.is_active());
        assert!(!SessionState::Stopping.is_active());
        assert!(!SessionState::Prepared.is_active());
        assert_eq!(SessionState::default(), SessionState::NotStarted);
    }

    #[test]
    fn test_completed_workout_duration_serializes_as_seconds() {
        let workout = CompletedWorkout {
            id: Uuid::new_v4(),
            configuration: WorkoutConfiguration::new(ActivityType::Cycling, Venue::Outdoor),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration: Duration::from_millis(90_500),
            total_active_energy_kcal: Some(120.0),
            total_distance_meters: None,
            average_heart_rate_bpm: None,
        };

        let json: serde_json::Value = serde_json::to_value(&workout).unwrap();
        assert_eq!(json["duration"], 90.5);
        assert_eq!(json["configuration"]["activity_type"], "cycling");
    }
}
