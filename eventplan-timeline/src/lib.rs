//! Event timeline engine: scheduled items, dependencies, conflict detection,
//! progress tracking, templates and generated timelines, plus the REST API
//! that exposes them.

pub mod access;
pub mod api;
pub mod conflicts;
pub mod dependencies;
pub mod generation;
pub mod model;
pub mod progress;
pub mod repository;
pub mod requests;
pub mod service;
pub mod store;
pub mod templates;
pub mod time_of_day;

pub use access::{EventAccess, EventRecord, InMemoryEventDirectory};
pub use api::{TimelineApiBuilder, TimelineServiceConfig};
pub use conflicts::{Conflict, ValidationReport};
pub use dependencies::DependencyViolation;
pub use generation::{FallbackGenerator, HttpTimelineGenerator, TimelineGenerator};
pub use model::{
    ChangeKind, Dependency, DependencyType, ItemStatus, ItemType, Template, Timeline,
    TimelineDetail, TimelineItem,
};
pub use progress::{TimelineProgress, TimelineStatistics};
pub use repository::{PgEventDirectory, PgTimelineStore};
pub use service::TimelineService;
pub use store::{InMemoryTimelineStore, TimelineStore};
