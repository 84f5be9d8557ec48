use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use eventplan_core::errors::PlannerError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time_of_day::{self, add_minutes, minute_of_day, minutes_between};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PlannerError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(PlannerError::invalid(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Kind of activity a timeline item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Setup,
    Arrival,
    #[default]
    Activity,
    Meal,
    Entertainment,
    Speech,
    Ceremony,
    Break,
    Cleanup,
    Departure,
    Custom,
}

text_enum!(ItemType {
    Setup => "setup",
    Arrival => "arrival",
    Activity => "activity",
    Meal => "meal",
    Entertainment => "entertainment",
    Speech => "speech",
    Ceremony => "ceremony",
    Break => "break",
    Cleanup => "cleanup",
    Departure => "departure",
    Custom => "custom",
});

/// Execution status of a timeline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Delayed,
}

text_enum!(ItemStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Skipped => "skipped",
    Delayed => "delayed",
});

impl ItemStatus {
    /// Completed and skipped items can no longer run late.
    pub fn is_closed(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Skipped)
    }
}

/// Scheduling constraint between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

text_enum!(DependencyType {
    FinishToStart => "finish_to_start",
    StartToStart => "start_to_start",
    FinishToFinish => "finish_to_finish",
    StartToFinish => "start_to_finish",
});

/// Kind of audit record kept for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    StatusChange,
    TimeChange,
}

text_enum!(ChangeKind {
    StatusChange => "status_change",
    TimeChange => "time_change",
});

pub const DEFAULT_BUFFER_MINUTES: i32 = 15;
pub const DEFAULT_SETUP_BUFFER_MINUTES: i32 = 30;
pub const DEFAULT_CLEANUP_BUFFER_MINUTES: i32 = 30;
pub const DEFAULT_ITEM_DURATION_MINUTES: i32 = 60;
/// Items and blueprint offsets stay within one day.
pub const MAX_ITEM_DURATION_MINUTES: i32 = 24 * 60;
pub const MAX_START_OFFSET_MINUTES: i64 = time_of_day::MINUTES_PER_DAY;

/// Ordered plan of activities for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub id: Uuid,
    pub event_id: Uuid,
    pub creator_id: Uuid,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    pub is_template: bool,
    pub auto_generated: bool,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    pub total_duration_minutes: i32,
    pub default_buffer_minutes: i32,
    pub setup_buffer_minutes: i32,
    pub cleanup_buffer_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timeline {
    /// Builds an empty, active timeline with default buffers.
    pub fn new(event_id: Uuid, creator_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            creator_id,
            template_id: None,
            title: title.into(),
            description: None,
            is_active: true,
            is_template: false,
            auto_generated: false,
            start_time: None,
            end_time: None,
            total_duration_minutes: 0,
            default_buffer_minutes: DEFAULT_BUFFER_MINUTES,
            setup_buffer_minutes: DEFAULT_SETUP_BUFFER_MINUTES,
            cleanup_buffer_minutes: DEFAULT_CLEANUP_BUFFER_MINUTES,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single scheduled activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: Uuid,
    pub timeline_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub item_type: ItemType,
    #[serde(with = "time_of_day::flexible")]
    pub start_time: NaiveTime,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    pub duration_minutes: i32,
    pub buffer_minutes: i32,
    pub status: ItemStatus,
    pub order_index: i32,
    pub is_critical: bool,
    pub is_flexible: bool,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub actual_start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub actual_end_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimelineItem {
    /// Builds a pending item whose end is derived from its duration.
    pub fn new(
        timeline_id: Uuid,
        title: impl Into<String>,
        start_time: NaiveTime,
        duration_minutes: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            timeline_id,
            title: title.into(),
            description: None,
            item_type: ItemType::Activity,
            start_time,
            end_time: Some(add_minutes(start_time, i64::from(duration_minutes))),
            duration_minutes,
            buffer_minutes: 0,
            status: ItemStatus::Pending,
            order_index: 0,
            is_critical: false,
            is_flexible: true,
            requirements: Vec::new(),
            notes: None,
            location: None,
            assigned_to: None,
            task_id: None,
            actual_start_time: None,
            actual_end_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Planned end, derived from the duration when no end is stored.
    pub fn planned_end(&self) -> NaiveTime {
        self.end_time
            .unwrap_or_else(|| add_minutes(self.start_time, i64::from(self.duration_minutes)))
    }

    /// Half-open `[start, end)` window in minutes of the day; `end` may exceed a day.
    pub fn window(&self) -> (i64, i64) {
        let start = minute_of_day(self.start_time);
        let length = match self.end_time {
            Some(end) => minutes_between(self.start_time, end),
            None => i64::from(self.duration_minutes),
        };
        (start, start + length)
    }

    /// An open item is overdue once `now` passes its end (or its start without an end).
    pub fn is_overdue(&self, now: NaiveTime) -> bool {
        if self.status.is_closed() {
            return false;
        }
        now > self.end_time.unwrap_or(self.start_time)
    }

    pub fn actual_duration_minutes(&self) -> Option<i64> {
        match (self.actual_start_time, self.actual_end_time) {
            (Some(start), Some(end)) => Some(minutes_between(start, end)),
            _ => None,
        }
    }
}

/// Ordering constraint: `item_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: Uuid,
    pub item_id: Uuid,
    pub depends_on_id: Uuid,
    pub dependency_type: DependencyType,
    pub lag_minutes: i32,
    pub created_at: DateTime<Utc>,
}

/// One item a template materializes, positioned relative to the event start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBlueprint {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub item_type: ItemType,
    #[serde(default)]
    pub start_time_offset_minutes: i64,
    #[serde(default = "default_blueprint_duration")]
    pub duration_minutes: i32,
}

fn default_blueprint_duration() -> i32 {
    DEFAULT_ITEM_DURATION_MINUTES
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateData {
    #[serde(default)]
    pub items: Vec<ItemBlueprint>,
}

/// Reusable timeline blueprint keyed by event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_type: String,
    pub is_public: bool,
    pub is_verified: bool,
    pub usage_count: i32,
    pub default_duration_hours: i32,
    pub setup_time_minutes: i32,
    pub cleanup_time_minutes: i32,
    pub template_data: TemplateData,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Private templates are only visible to their creator.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.is_public || self.creator_id == user_id
    }
}

/// Audit record of a status or schedule change on an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub id: Uuid,
    pub item_id: Uuid,
    pub changed_by: Uuid,
    pub kind: ChangeKind,
    #[serde(default)]
    pub old_value: Option<String>,
    #[serde(default)]
    pub new_value: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ItemChange {
    pub fn new(
        item_id: Uuid,
        changed_by: Uuid,
        kind: ChangeKind,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            changed_by,
            kind,
            old_value,
            new_value,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// Timeline together with its ordered items and dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineDetail {
    #[serde(flatten)]
    pub timeline: Timeline,
    pub items: Vec<TimelineItem>,
    pub dependencies: Vec<Dependency>,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, per_page: u32) -> Self {
        let pages = if per_page == 0 {
            0
        } else {
            ((total + u64::from(per_page) - 1) / u64::from(per_page)) as u32
        };
        Self {
            items,
            total,
            page,
            per_page,
            pages,
        }
    }

    /// Slices an already filtered collection.
    pub fn paginate(all: Vec<T>, page: u32, per_page: u32) -> Self {
        let total = all.len() as u64;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(per_page as usize);
        let items = all.into_iter().skip(skip).take(per_page as usize).collect();
        Self::new(items, total, page, per_page)
    }
}
