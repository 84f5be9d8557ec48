use chrono::{NaiveTime, Utc};
use eventplan_core::errors::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    ChangeKind, DependencyType, ItemChange, ItemStatus, ItemType, TemplateData, Timeline,
    TimelineItem, DEFAULT_ITEM_DURATION_MINUTES, MAX_ITEM_DURATION_MINUTES,
};
use crate::time_of_day::{self, add_minutes};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

fn check_buffer(name: &str, value: Option<i32>) -> Result<()> {
    match value {
        Some(minutes) if minutes < 0 => Err(PlannerError::invalid(format!(
            "{name} must not be negative"
        ))),
        _ => Ok(()),
    }
}

/// Item durations are positive and fit in one day.
pub fn check_duration(minutes: i32) -> Result<()> {
    if minutes <= 0 {
        return Err(PlannerError::invalid("duration_minutes must be positive"));
    }
    if minutes > MAX_ITEM_DURATION_MINUTES {
        return Err(PlannerError::invalid(format!(
            "duration_minutes must not exceed {MAX_ITEM_DURATION_MINUTES}"
        )));
    }
    Ok(())
}

fn page_bounds(page: Option<u32>, per_page: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, per_page)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTimeline {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub default_buffer_minutes: Option<i32>,
    #[serde(default)]
    pub setup_buffer_minutes: Option<i32>,
    #[serde(default)]
    pub cleanup_buffer_minutes: Option<i32>,
    #[serde(default)]
    pub is_template: bool,
}

impl CreateTimeline {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn into_timeline(self, event_id: Uuid, creator_id: Uuid) -> Result<Timeline> {
        if self.title.trim().is_empty() {
            return Err(PlannerError::invalid("timeline title is required"));
        }
        check_buffer("default_buffer_minutes", self.default_buffer_minutes)?;
        check_buffer("setup_buffer_minutes", self.setup_buffer_minutes)?;
        check_buffer("cleanup_buffer_minutes", self.cleanup_buffer_minutes)?;

        let mut timeline = Timeline::new(event_id, creator_id, self.title);
        timeline.description = self.description;
        timeline.start_time = self.start_time;
        timeline.end_time = self.end_time;
        timeline.is_template = self.is_template;
        if let Some(minutes) = self.default_buffer_minutes {
            timeline.default_buffer_minutes = minutes;
        }
        if let Some(minutes) = self.setup_buffer_minutes {
            timeline.setup_buffer_minutes = minutes;
        }
        if let Some(minutes) = self.cleanup_buffer_minutes {
            timeline.cleanup_buffer_minutes = minutes;
        }
        Ok(timeline)
    }
}

/// Partial update of a timeline's descriptive fields and buffers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub default_buffer_minutes: Option<i32>,
    #[serde(default)]
    pub setup_buffer_minutes: Option<i32>,
    #[serde(default)]
    pub cleanup_buffer_minutes: Option<i32>,
}

impl TimelineUpdate {
    pub fn apply_to(self, timeline: &mut Timeline) -> Result<()> {
        check_buffer("default_buffer_minutes", self.default_buffer_minutes)?;
        check_buffer("setup_buffer_minutes", self.setup_buffer_minutes)?;
        check_buffer("cleanup_buffer_minutes", self.cleanup_buffer_minutes)?;

        if let Some(title) = self.title {
            if title.trim().is_empty() {
                return Err(PlannerError::invalid("timeline title is required"));
            }
            timeline.title = title;
        }
        if let Some(description) = self.description {
            timeline.description = Some(description);
        }
        if let Some(start) = self.start_time {
            timeline.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            timeline.end_time = Some(end);
        }
        if let Some(minutes) = self.default_buffer_minutes {
            timeline.default_buffer_minutes = minutes;
        }
        if let Some(minutes) = self.setup_buffer_minutes {
            timeline.setup_buffer_minutes = minutes;
        }
        if let Some(minutes) = self.cleanup_buffer_minutes {
            timeline.cleanup_buffer_minutes = minutes;
        }
        timeline.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTimelineItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub item_type: Option<ItemType>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub buffer_minutes: Option<i32>,
    #[serde(default)]
    pub order_index: Option<i32>,
    #[serde(default)]
    pub is_critical: bool,
    #[serde(default)]
    pub is_flexible: Option<bool>,
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
}

impl NewTimelineItem {
    pub fn at(title: impl Into<String>, start_time: NaiveTime) -> Self {
        Self {
            title: title.into(),
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    pub fn lasting(mut self, minutes: i32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn of_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// Validates the payload and builds a pending item for `timeline_id`.
    pub fn into_item(self, timeline_id: Uuid, default_order: i32) -> Result<TimelineItem> {
        if self.title.trim().is_empty() {
            return Err(PlannerError::invalid("item title is required"));
        }
        let start = self
            .start_time
            .ok_or_else(|| PlannerError::invalid("start_time is required"))?;
        let duration = self.duration_minutes.unwrap_or(DEFAULT_ITEM_DURATION_MINUTES);
        check_duration(duration)?;
        check_buffer("buffer_minutes", self.buffer_minutes)?;
        if let Some(end) = self.end_time {
            if end <= start {
                return Err(PlannerError::invalid("end_time must be after start_time"));
            }
        }

        let mut item = TimelineItem::new(timeline_id, self.title, start, duration);
        if let Some(end) = self.end_time {
            item.end_time = Some(end);
        }
        item.description = self.description;
        item.item_type = self.item_type.unwrap_or_default();
        item.buffer_minutes = self.buffer_minutes.unwrap_or(0);
        item.order_index = self.order_index.unwrap_or(default_order);
        item.is_critical = self.is_critical;
        item.is_flexible = self.is_flexible.unwrap_or(true);
        item.requirements = self.requirements;
        item.notes = self.notes;
        item.location = self.location;
        item.assigned_to = self.assigned_to;
        item.task_id = self.task_id;
        Ok(item)
    }
}

/// Partial update of an item; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub item_type: Option<ItemType>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub buffer_minutes: Option<i32>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub order_index: Option<i32>,
    #[serde(default)]
    pub is_critical: Option<bool>,
    #[serde(default)]
    pub is_flexible: Option<bool>,
    #[serde(default)]
    pub requirements: Option<Vec<String>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
}

impl ItemUpdate {
    /// Merges the update into `item` and returns the audit records it produced.
    pub fn apply_to(self, item: &mut TimelineItem, changed_by: Uuid) -> Result<Vec<ItemChange>> {
        let start = self.start_time.unwrap_or(item.start_time);
        let duration = self.duration_minutes.unwrap_or(item.duration_minutes);
        check_duration(duration)?;
        check_buffer("buffer_minutes", self.buffer_minutes)?;

        let end = match self.end_time {
            Some(end) => {
                if end <= start {
                    return Err(PlannerError::invalid("end_time must be after start_time"));
                }
                Some(end)
            }
            None if self.start_time.is_some() || self.duration_minutes.is_some() => {
                Some(add_minutes(start, i64::from(duration)))
            }
            None => item.end_time,
        };

        let mut changes = Vec::new();
        if start != item.start_time || end != item.end_time {
            changes.push(ItemChange::new(
                item.id,
                changed_by,
                ChangeKind::TimeChange,
                Some(describe_window(item.start_time, item.end_time)),
                Some(describe_window(start, end)),
            ));
        }
        if let Some(status) = self.status {
            if status != item.status {
                changes.push(ItemChange::new(
                    item.id,
                    changed_by,
                    ChangeKind::StatusChange,
                    Some(item.status.to_string()),
                    Some(status.to_string()),
                ));
                item.status = status;
            }
        }

        item.start_time = start;
        item.end_time = end;
        item.duration_minutes = duration;

        if let Some(title) = self.title {
            item.title = title;
        }
        if let Some(description) = self.description {
            item.description = Some(description);
        }
        if let Some(item_type) = self.item_type {
            item.item_type = item_type;
        }
        if let Some(buffer) = self.buffer_minutes {
            item.buffer_minutes = buffer;
        }
        if let Some(order_index) = self.order_index {
            item.order_index = order_index;
        }
        if let Some(critical) = self.is_critical {
            item.is_critical = critical;
        }
        if let Some(flexible) = self.is_flexible {
            item.is_flexible = flexible;
        }
        if let Some(requirements) = self.requirements {
            item.requirements = requirements;
        }
        if let Some(notes) = self.notes {
            item.notes = Some(notes);
        }
        if let Some(location) = self.location {
            item.location = Some(location);
        }
        if let Some(assignee) = self.assigned_to {
            item.assigned_to = Some(assignee);
        }
        if let Some(task_id) = self.task_id {
            item.task_id = Some(task_id);
        }
        item.updated_at = Utc::now();
        Ok(changes)
    }
}

fn describe_window(start: NaiveTime, end: Option<NaiveTime>) -> String {
    match end {
        Some(end) => format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
        None => start.format("%H:%M").to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ItemStatus,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub actual_start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day::flexible_option")]
    pub actual_end_time: Option<NaiveTime>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: ItemStatus) -> Self {
        Self {
            status,
            actual_start_time: None,
            actual_end_time: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOrder {
    pub item_id: Uuid,
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDependency {
    pub item_id: Uuid,
    pub depends_on_id: Uuid,
    #[serde(default)]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub lag_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub default_duration_hours: Option<i32>,
    #[serde(default)]
    pub setup_time_minutes: Option<i32>,
    #[serde(default)]
    pub cleanup_time_minutes: Option<i32>,
    #[serde(default)]
    pub template_data: TemplateData,
}

/// Parameters for generating a timeline; unset values fall back to the event's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateTimeline {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub duration_hours: Option<u32>,
    #[serde(default)]
    pub guest_count: Option<u32>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineFilter {
    #[serde(default)]
    pub creator_id: Option<Uuid>,
    #[serde(default)]
    pub is_template: Option<bool>,
    #[serde(default)]
    pub auto_generated: Option<bool>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl TimelineFilter {
    pub fn page_bounds(&self) -> (u32, u32) {
        page_bounds(self.page, self.per_page)
    }

    pub fn matches(&self, timeline: &Timeline) -> bool {
        timeline.is_active
            && self.creator_id.map_or(true, |id| timeline.creator_id == id)
            && self.is_template.map_or(true, |flag| timeline.is_template == flag)
            && self
                .auto_generated
                .map_or(true, |flag| timeline.auto_generated == flag)
    }
}

/// Free-text search over the active timelines a caller can read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineSearch {
    /// Case-insensitive match against title or description.
    #[serde(default)]
    pub query: Option<String>,
    /// Restricts to timelines of events with this type.
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub creator_id: Option<Uuid>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl TimelineSearch {
    pub fn page_bounds(&self) -> (u32, u32) {
        page_bounds(self.page, self.per_page)
    }

    /// Trimmed search text; blank queries match everything.
    pub fn text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Checks everything except event visibility and event type.
    pub fn matches(&self, timeline: &Timeline) -> bool {
        if !timeline.is_active
            || self.creator_id.map_or(false, |id| timeline.creator_id != id)
            || self.event_id.map_or(false, |id| timeline.event_id != id)
        {
            return false;
        }
        let Some(text) = self.text() else {
            return true;
        };
        let needle = text.to_lowercase();
        timeline.title.to_lowercase().contains(&needle)
            || timeline
                .description
                .as_deref()
                .map_or(false, |description| description.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateFilter {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub creator_id: Option<Uuid>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl TemplateFilter {
    pub fn page_bounds(&self) -> (u32, u32) {
        page_bounds(self.page, self.per_page)
    }
}
