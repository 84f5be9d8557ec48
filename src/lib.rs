//! EventPlan: timeline planning for events.
//!
//! The workspace is split into:
//!
//! * `eventplan-core` (re-exported as `shared`): errors, configuration, database pool, clocks and logging
//! * `eventplan-timeline` (re-exported as `timeline`): the timeline engine, its stores and the REST service
//! * `eventplan-cli`: offline tooling over plan files

pub use eventplan_core as shared;
pub use eventplan_timeline as timeline;

pub use eventplan_core::{Clock, FixedClock, PlannerError, SystemClock};
pub use eventplan_timeline::{
    InMemoryEventDirectory, InMemoryTimelineStore, TimelineApiBuilder, TimelineService,
    TimelineServiceConfig,
};

/// Version of the timeline REST API.
pub const API_VERSION: &str = "1.0.0";

/// Whether a client speaking `version` can talk to this API.
pub fn verify_api_compatibility(version: &str) -> bool {
    version.split('.').next() == API_VERSION.split('.').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_version_decides_compatibility() {
        assert!(verify_api_compatibility("1.4.2"));
        assert!(!verify_api_compatibility("2.0.0"));
    }
}
