//! Quantity dispatch
//!
//! Maps an `(activity type, sample kind)` pair to the snapshot field the sample
//! updates. The mapping is plain data: supporting a new activity means adding
//! rows to [`STANDARD_ROUTES`], not new branches in the coordinator.

use serde::Serialize;

use crate::types::{ActivityType, SampleKind, Venue, WorkoutConfiguration};

/// Snapshot field a sample can update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    HeartRate,
    ActiveEnergy,
    Distance,
    Speed,
}

/// How successive samples for a field combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Instantaneous reading; the most recent sample wins
    Latest,
    /// Incremental quantity; samples are summed
    CumulativeSum,
}

impl MetricField {
    pub fn aggregation(&self) -> Aggregation {
        match self {
            MetricField::HeartRate | MetricField::Speed => Aggregation::Latest,
            MetricField::ActiveEnergy | MetricField::Distance => Aggregation::CumulativeSum,
        }
    }
}

/// Which activities a route applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "match", content = "activity")]
pub enum ActivityMatch {
    Any,
    Only(ActivityType),
}

impl ActivityMatch {
    fn matches(&self, activity: ActivityType) -> bool {
        match self {
            ActivityMatch::Any => true,
            ActivityMatch::Only(a) => *a == activity,
        }
    }
}

/// One row of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub activity: ActivityMatch,
    pub kind: SampleKind,
    pub field: MetricField,
}

const fn route(activity: ActivityMatch, kind: SampleKind, field: MetricField) -> Route {
    Route {
        activity,
        kind,
        field,
    }
}

use ActivityMatch::{Any, Only};

/// Default routes for the supported activity types
pub const STANDARD_ROUTES: &[Route] = &[
    route(Any, SampleKind::HeartRate, MetricField::HeartRate),
    route(Any, SampleKind::ActiveEnergyBurned, MetricField::ActiveEnergy),
    route(Only(ActivityType::Walking), SampleKind::DistanceWalkingRunning, MetricField::Distance),
    route(Only(ActivityType::Running), SampleKind::DistanceWalkingRunning, MetricField::Distance),
    route(Only(ActivityType::Hiking), SampleKind::DistanceWalkingRunning, MetricField::Distance),
    route(Only(ActivityType::Cycling), SampleKind::DistanceCycling, MetricField::Distance),
    route(Only(ActivityType::Cycling), SampleKind::CyclingSpeed, MetricField::Speed),
    route(Only(ActivityType::Rowing), SampleKind::DistanceRowing, MetricField::Distance),
    route(Only(ActivityType::Rowing), SampleKind::RowingSpeed, MetricField::Speed),
    route(Only(ActivityType::Swimming), SampleKind::DistanceSwimming, MetricField::Distance),
];

/// Capabilities of a configuration, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub supports_distance: bool,
    pub supports_speed: bool,
}

/// Lookup table from `(activity, sample kind)` to snapshot field
#[derive(Debug, Clone)]
pub struct QuantityDispatchTable {
    routes: Vec<Route>,
}

impl Default for QuantityDispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl QuantityDispatchTable {
    /// Table built from [`STANDARD_ROUTES`]
    pub fn standard() -> Self {
        Self::new(STANDARD_ROUTES.to_vec())
    }

    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolve the field a sample updates; `None` for unmapped combinations.
    ///
    /// Activity-specific routes take precedence over `Any` routes.
    pub fn lookup(&self, activity: ActivityType, kind: SampleKind) -> Option<MetricField> {
        let mut fallback = None;
        for r in self.routes.iter().filter(|r| r.kind == kind) {
            match r.activity {
                ActivityMatch::Only(a) if a == activity => return Some(r.field),
                ActivityMatch::Any => fallback = fallback.or(Some(r.field)),
                ActivityMatch::Only(_) => {}
            }
        }
        fallback
    }

    /// Routes that apply to the given activity
    pub fn routes_for(&self, activity: ActivityType) -> Vec<Route> {
        self.routes
            .iter()
            .filter(|r| r.activity.matches(activity))
            .copied()
            .collect()
    }

    fn exposes(&self, activity: ActivityType, field: MetricField) -> bool {
        self.routes
            .iter()
            .any(|r| r.field == field && r.activity.matches(activity))
    }

    /// Compute the capability flags for a configuration.
    ///
    /// Stationary indoor cycling reports neither distance nor speed.
    pub fn capabilities(&self, config: &WorkoutConfiguration) -> Capabilities {
        let stationary =
            config.activity_type == ActivityType::Cycling && config.venue == Venue::Indoor;

        Capabilities {
            supports_distance: !stationary
                && self.exposes(config.activity_type, MetricField::Distance),
            supports_speed: !stationary && self.exposes(config.activity_type, MetricField::Speed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heart_rate_maps_for_every_activity() {
        let table = QuantityDispatchTable::standard();
        for activity in ActivityType::ALL {
            assert_eq!(
                table.lookup(activity, SampleKind::HeartRate),
                Some(MetricField::HeartRate)
            );
            assert_eq!(
                table.lookup(activity, SampleKind::ActiveEnergyBurned),
                Some(MetricField::ActiveEnergy)
            );
        }
    }

    #[test]
    fn test_distance_kind_depends_on_activity() {
        let table = QuantityDispatchTable::standard();

        assert_eq!(
            table.lookup(ActivityType::Running, SampleKind::DistanceWalkingRunning),
            Some(MetricField::Distance)
        );
        assert_eq!(
            table.lookup(ActivityType::Rowing, SampleKind::DistanceRowing),
            Some(MetricField::Distance)
        );
        assert_eq!(
            table.lookup(ActivityType::Cycling, SampleKind::DistanceCycling),
            Some(MetricField::Distance)
        );

        // Wrong distance kind for the activity is ignored
        assert_eq!(table.lookup(ActivityType::Running, SampleKind::DistanceRowing), None);
        assert_eq!(table.lookup(ActivityType::Rowing, SampleKind::DistanceWalkingRunning), None);
    }

    #[test]
    fn test_unmapped_kinds_are_ignored() {
        let table = QuantityDispatchTable::standard();
        assert_eq!(table.lookup(ActivityType::Yoga, SampleKind::StepCount), None);
        assert_eq!(table.lookup(ActivityType::Running, SampleKind::RowingSpeed), None);
    }

    #[test]
    fn test_aggregation_semantics() {
        assert_eq!(MetricField::HeartRate.aggregation(), Aggregation::Latest);
        assert_eq!(MetricField::Speed.aggregation(), Aggregation::Latest);
        assert_eq!(MetricField::ActiveEnergy.aggregation(), Aggregation::CumulativeSum);
        assert_eq!(MetricField::Distance.aggregation(), Aggregation::CumulativeSum);
    }

    #[test]
    fn test_capabilities() {
        let table = QuantityDispatchTable::standard();

        let running = table.capabilities(&WorkoutConfiguration::new(
            ActivityType::Running,
            Venue::Outdoor,
        ));
        assert_eq!(
            running,
            Capabilities {
                supports_distance: true,
                supports_speed: false
            }
        );

        let rowing =
            table.capabilities(&WorkoutConfiguration::new(ActivityType::Rowing, Venue::Outdoor));
        assert!(rowing.supports_distance);
        assert!(rowing.supports_speed);

        let spin =
            table.capabilities(&WorkoutConfiguration::new(ActivityType::Cycling, Venue::Indoor));
        assert_eq!(spin, Capabilities::default());

        let yoga =
            table.capabilities(&WorkoutConfiguration::new(ActivityType::Yoga, Venue::Indoor));
        assert_eq!(yoga, Capabilities::default());
    }

    #[test]
    fn test_specific_route_overrides_any() {
        let table = QuantityDispatchTable::new(vec![
            route(ActivityMatch::Any, SampleKind::CyclingSpeed, MetricField::Speed),
            route(
                ActivityMatch::Only(ActivityType::Cycling),
                SampleKind::CyclingSpeed,
                MetricField::Distance,
            ),
        ]);

        assert_eq!(
            table.lookup(ActivityType::Cycling, SampleKind::CyclingSpeed),
            Some(MetricField::Distance)
        );
        assert_eq!(
            table.lookup(ActivityType::Rowing, SampleKind::CyclingSpeed),
            Some(MetricField::Speed)
        );
    }

    #[test]
    fn test_routes_for_activity() {
        let table = QuantityDispatchTable::standard();
        let rowing: Vec<SampleKind> = table
            .routes_for(ActivityType::Rowing)
            .iter()
            .map(|r| r.kind)
            .collect();

        assert_eq!(
            rowing,
            vec![
                SampleKind::HeartRate,
                SampleKind::ActiveEnergyBurned,
                SampleKind::DistanceRowing,
                SampleKind::RowingSpeed,
            ]
        );
    }
}
