use chrono::{NaiveTime, Utc};
use eventplan_core::errors::{PlannerError, Result};
use uuid::Uuid;

use crate::access::EventRecord;
use crate::model::{ItemBlueprint, Template, Timeline, TimelineItem, MAX_START_OFFSET_MINUTES};
use crate::requests::{check_duration, NewTemplate};
use crate::time_of_day::add_minutes;

pub const DEFAULT_TEMPLATE_HOURS: i32 = 4;
pub const DEFAULT_SETUP_MINUTES: i32 = 60;
pub const DEFAULT_CLEANUP_MINUTES: i32 = 30;

/// Rejects blueprints without a title or outside the single-day bounds.
pub fn check_blueprints(blueprints: &[ItemBlueprint]) -> Result<()> {
    for (position, blueprint) in blueprints.iter().enumerate() {
        if blueprint.title.trim().is_empty() {
            return Err(PlannerError::invalid(format!(
                "template item {position} has no title"
            )));
        }
        check_duration(blueprint.duration_minutes).map_err(|err| {
            PlannerError::invalid(format!("template item '{}': {err}", blueprint.title))
        })?;
        if !(-MAX_START_OFFSET_MINUTES..=MAX_START_OFFSET_MINUTES)
            .contains(&blueprint.start_time_offset_minutes)
        {
            return Err(PlannerError::invalid(format!(
                "template item '{}' starts more than {MAX_START_OFFSET_MINUTES} minutes from the event start",
                blueprint.title
            )));
        }
    }
    Ok(())
}

/// Validates a template payload and fills in its defaults.
pub fn build_template(creator_id: Uuid, data: NewTemplate) -> Result<Template> {
    if data.name.trim().is_empty() {
        return Err(PlannerError::invalid("template name is required"));
    }
    if data.event_type.trim().is_empty() {
        return Err(PlannerError::invalid("template event_type is required"));
    }
    check_blueprints(&data.template_data.items)?;

    let hours = data.default_duration_hours.unwrap_or(DEFAULT_TEMPLATE_HOURS);
    let setup = data.setup_time_minutes.unwrap_or(DEFAULT_SETUP_MINUTES);
    let cleanup = data.cleanup_time_minutes.unwrap_or(DEFAULT_CLEANUP_MINUTES);
    if hours <= 0 || setup < 0 || cleanup < 0 {
        return Err(PlannerError::invalid(
            "template durations must not be negative",
        ));
    }

    let now = Utc::now();
    Ok(Template {
        id: Uuid::new_v4(),
        name: data.name,
        description: data.description,
        event_type: data.event_type,
        is_public: data.is_public,
        is_verified: false,
        usage_count: 0,
        default_duration_hours: hours,
        setup_time_minutes: setup,
        cleanup_time_minutes: cleanup,
        template_data: data.template_data,
        creator_id,
        created_at: now,
        updated_at: now,
    })
}

/// Turns blueprints into pending items anchored at `anchor`, in blueprint order.
pub fn materialize(
    timeline_id: Uuid,
    anchor: NaiveTime,
    blueprints: &[ItemBlueprint],
) -> Result<Vec<TimelineItem>> {
    check_blueprints(blueprints)?;
    let items = blueprints
        .iter()
        .enumerate()
        .map(|(position, blueprint)| {
            let start = add_minutes(anchor, blueprint.start_time_offset_minutes);
            let mut item =
                TimelineItem::new(timeline_id, blueprint.title.clone(), start, blueprint.duration_minutes);
            item.description = blueprint.description.clone();
            item.item_type = blueprint.item_type;
            item.order_index = position as i32;
            item
        })
        .collect();
    Ok(items)
}

/// Timeline shell whose window follows the event's times of day.
fn event_timeline(event: &EventRecord, creator_id: Uuid, title: String) -> Timeline {
    let mut timeline = Timeline::new(event.id, creator_id, title);
    timeline.start_time = Some(event.start_datetime.time());
    timeline.end_time = event.end_datetime.map(|end| end.time());
    timeline
}

/// Builds the timeline and items a template application persists.
pub fn timeline_from_template(
    template: &Template,
    event: &EventRecord,
    creator_id: Uuid,
) -> Result<(Timeline, Vec<TimelineItem>)> {
    let mut timeline = event_timeline(event, creator_id, format!("{} - {}", template.name, event.title));
    timeline.template_id = Some(template.id);
    timeline.description = template.description.clone();
    let items = materialize(
        timeline.id,
        event.start_datetime.time(),
        &template.template_data.items,
    )?;
    Ok((timeline, items))
}

/// Builds the auto-generated timeline for a set of proposed items.
pub fn generated_timeline(
    event: &EventRecord,
    creator_id: Uuid,
    proposed: &[ItemBlueprint],
) -> Result<(Timeline, Vec<TimelineItem>)> {
    let mut timeline = event_timeline(
        event,
        creator_id,
        format!("AI Generated Timeline - {}", event.title),
    );
    timeline.auto_generated = true;
    let items = materialize(timeline.id, event.start_datetime.time(), proposed)?;
    Ok((timeline, items))
}
