use std::sync::Arc;
use std::time::Duration;

use eventplan_core::errors::{PlannerError, Result};
use eventplan_core::{Clock, SystemClock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::{can_edit_timeline, EventAccess, EventRecord};
use crate::conflicts::{detect_conflicts, Conflict, ValidationReport};
use crate::dependencies::{check_dependencies, would_create_cycle, DependencyViolation};
use crate::generation::{FallbackGenerator, GenerationRequest, TimelineGenerator};
use crate::model::{
    ChangeKind, Dependency, ItemChange, ItemStatus, Page, Template, Timeline, TimelineDetail,
    TimelineItem,
};
use crate::progress::{
    compute_progress, compute_statistics, overdue_items, upcoming_items, TimelineProgress,
    TimelineStatistics, DEFAULT_UPCOMING_WINDOW_MINUTES,
};
use crate::requests::{
    CreateTimeline, GenerateTimeline, ItemOrder, ItemUpdate, NewDependency, NewTemplate,
    NewTimelineItem, StatusUpdate, TemplateFilter, TimelineFilter, TimelineSearch, TimelineUpdate,
};
use crate::store::TimelineStore;
use crate::templates::{
    build_template, check_blueprints, generated_timeline, timeline_from_template,
};

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeline engine: CRUD, conflict detection, progress, templates and generation.
#[derive(Clone)]
pub struct TimelineService {
    store: Arc<dyn TimelineStore>,
    events: Arc<dyn EventAccess>,
    generator: Arc<dyn TimelineGenerator>,
    clock: Arc<dyn Clock>,
    generation_timeout: Duration,
    fallback_enabled: bool,
}

impl TimelineService {
    pub fn new(store: Arc<dyn TimelineStore>, events: Arc<dyn EventAccess>) -> Self {
        Self {
            store,
            events,
            generator: Arc::new(FallbackGenerator),
            clock: Arc::new(SystemClock::utc()),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            fallback_enabled: true,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TimelineGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    async fn active_timeline(&self, timeline_id: Uuid) -> Result<Timeline> {
        match self.store.get_timeline(timeline_id).await? {
            Some(timeline) if timeline.is_active => Ok(timeline),
            _ => Err(PlannerError::not_found(format!(
                "timeline {timeline_id} not found"
            ))),
        }
    }

    async fn readable_timeline(&self, timeline_id: Uuid, user_id: Uuid) -> Result<Timeline> {
        let timeline = self.active_timeline(timeline_id).await?;
        self.events
            .get_event_with_access(timeline.event_id, user_id)
            .await?;
        Ok(timeline)
    }

    async fn owning_event(&self, timeline: &Timeline) -> Result<EventRecord> {
        self.events
            .find_event(timeline.event_id)
            .await?
            .ok_or_else(|| PlannerError::not_found(format!("event {} not found", timeline.event_id)))
    }

    async fn ensure_can_edit(&self, timeline: &Timeline, user_id: Uuid) -> Result<()> {
        let event = self.owning_event(timeline).await?;
        if !can_edit_timeline(timeline, &event, user_id) {
            return Err(PlannerError::unauthorized(format!(
                "user {user_id} cannot edit timeline {}",
                timeline.id
            )));
        }
        Ok(())
    }

    async fn editable_timeline(&self, timeline_id: Uuid, user_id: Uuid) -> Result<Timeline> {
        let timeline = self.active_timeline(timeline_id).await?;
        self.ensure_can_edit(&timeline, user_id).await?;
        Ok(timeline)
    }

    async fn item_with_timeline(&self, item_id: Uuid) -> Result<(TimelineItem, Timeline)> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| PlannerError::not_found(format!("item {item_id} not found")))?;
        let timeline = self.active_timeline(item.timeline_id).await?;
        Ok((item, timeline))
    }

    // Timelines

    pub async fn create_timeline(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        data: CreateTimeline,
    ) -> Result<Timeline> {
        self.events.get_event_for_edit(event_id, user_id).await?;
        let timeline = data.into_timeline(event_id, user_id)?;
        let timeline = self.store.insert_timeline(timeline).await?;
        info!(timeline_id = %timeline.id, %event_id, "created timeline");
        Ok(timeline)
    }

    pub async fn get_timeline(&self, timeline_id: Uuid, user_id: Uuid) -> Result<TimelineDetail> {
        let timeline = self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        let dependencies = self.store.list_dependencies(timeline_id).await?;
        Ok(TimelineDetail {
            timeline,
            items,
            dependencies,
        })
    }

    pub async fn list_event_timelines(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        filter: TimelineFilter,
    ) -> Result<Page<Timeline>> {
        self.events.get_event_with_access(event_id, user_id).await?;
        self.store.list_event_timelines(event_id, &filter).await
    }

    /// Searches the active timelines of every event the caller can read.
    pub async fn search_timelines(
        &self,
        user_id: Uuid,
        search: TimelineSearch,
    ) -> Result<Page<Timeline>> {
        let event_ids = self
            .events
            .readable_events(user_id, search.event_type.as_deref())
            .await?;
        let page = self.store.search_timelines(&event_ids, &search).await?;
        debug!(%user_id, events = event_ids.len(), matches = page.total, "searched timelines");
        Ok(page)
    }

    /// Timelines the caller created, on events they can still read.
    pub async fn list_user_timelines(
        &self,
        user_id: Uuid,
        mut search: TimelineSearch,
    ) -> Result<Page<Timeline>> {
        search.creator_id = Some(user_id);
        self.search_timelines(user_id, search).await
    }

    pub async fn update_timeline(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        update: TimelineUpdate,
    ) -> Result<Timeline> {
        let mut timeline = self.editable_timeline(timeline_id, user_id).await?;
        update.apply_to(&mut timeline)?;
        let timeline = self.store.update_timeline(timeline).await?;
        info!(%timeline_id, "updated timeline");
        Ok(timeline)
    }

    /// Soft delete: the timeline is deactivated and disappears from every lookup.
    pub async fn delete_timeline(&self, timeline_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut timeline = self.editable_timeline(timeline_id, user_id).await?;
        timeline.is_active = false;
        timeline.updated_at = chrono::Utc::now();
        self.store.update_timeline(timeline).await?;
        info!(%timeline_id, "deactivated timeline");
        Ok(true)
    }

    // Items

    pub async fn add_timeline_item(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        data: NewTimelineItem,
    ) -> Result<TimelineItem> {
        let mut items = self.bulk_add_items(timeline_id, user_id, vec![data]).await?;
        items
            .pop()
            .ok_or_else(|| PlannerError::General("item insert returned nothing".into()))
    }

    /// Validates every payload before inserting any of them.
    pub async fn bulk_add_items(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        data: Vec<NewTimelineItem>,
    ) -> Result<Vec<TimelineItem>> {
        self.editable_timeline(timeline_id, user_id).await?;
        let existing = self.store.list_items(timeline_id).await?.len() as i32;
        let items = data
            .into_iter()
            .enumerate()
            .map(|(offset, payload)| payload.into_item(timeline_id, existing + offset as i32))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Ok(items);
        }
        let items = self.store.insert_items(timeline_id, items).await?;
        info!(%timeline_id, count = items.len(), "added timeline items");
        Ok(items)
    }

    pub async fn update_timeline_item(
        &self,
        item_id: Uuid,
        user_id: Uuid,
        update: ItemUpdate,
    ) -> Result<TimelineItem> {
        let (mut item, timeline) = self.item_with_timeline(item_id).await?;
        self.ensure_can_edit(&timeline, user_id).await?;
        let changes = update.apply_to(&mut item, user_id)?;
        let item = self.store.update_item(item, changes).await?;
        info!(%item_id, timeline_id = %timeline.id, "updated timeline item");
        Ok(item)
    }

    /// Allowed for the assignee as well as timeline editors.
    pub async fn update_item_status(
        &self,
        item_id: Uuid,
        user_id: Uuid,
        update: StatusUpdate,
    ) -> Result<TimelineItem> {
        let (mut item, timeline) = self.item_with_timeline(item_id).await?;
        if item.assigned_to != Some(user_id) {
            self.ensure_can_edit(&timeline, user_id).await?;
        }

        let now = self.clock.time_of_day();
        let previous = item.status;
        match update.status {
            ItemStatus::InProgress => {
                item.actual_start_time = Some(update.actual_start_time.unwrap_or(now));
            }
            ItemStatus::Completed => {
                item.actual_end_time = Some(update.actual_end_time.unwrap_or(now));
                item.actual_start_time = item
                    .actual_start_time
                    .or(update.actual_start_time)
                    .or(Some(item.start_time));
            }
            _ => {
                if let Some(start) = update.actual_start_time {
                    item.actual_start_time = Some(start);
                }
                if let Some(end) = update.actual_end_time {
                    item.actual_end_time = Some(end);
                }
            }
        }
        item.status = update.status;
        item.updated_at = chrono::Utc::now();

        let change = ItemChange::new(
            item.id,
            user_id,
            ChangeKind::StatusChange,
            Some(previous.to_string()),
            Some(update.status.to_string()),
        )
        .with_reason(update.reason);
        let item = self.store.update_item(item, vec![change]).await?;
        info!(%item_id, from = %previous, to = %item.status, "updated item status");
        Ok(item)
    }

    pub async fn delete_timeline_item(&self, item_id: Uuid, user_id: Uuid) -> Result<bool> {
        let (_, timeline) = self.item_with_timeline(item_id).await?;
        self.ensure_can_edit(&timeline, user_id).await?;
        let deleted = self.store.delete_item(item_id).await?;
        info!(%item_id, timeline_id = %timeline.id, deleted, "deleted timeline item");
        Ok(deleted)
    }

    /// `false` when any order names a foreign item or repeats one; nothing changes then.
    pub async fn reorder_timeline_items(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        orders: Vec<ItemOrder>,
    ) -> Result<bool> {
        self.editable_timeline(timeline_id, user_id).await?;
        let applied = self.store.reorder_items(timeline_id, &orders).await?;
        if applied {
            info!(%timeline_id, count = orders.len(), "reordered timeline items");
        } else {
            warn!(%timeline_id, "rejected inconsistent reorder");
        }
        Ok(applied)
    }

    pub async fn get_item_history(&self, item_id: Uuid, user_id: Uuid) -> Result<Vec<ItemChange>> {
        let (_, timeline) = self.item_with_timeline(item_id).await?;
        self.events
            .get_event_with_access(timeline.event_id, user_id)
            .await?;
        self.store.list_changes(item_id).await
    }

    // Conflicts and dependencies

    pub async fn validate_timeline(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
    ) -> Result<ValidationReport> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        let deps = self.store.list_dependencies(timeline_id).await?;
        let violations = check_dependencies(&items, &deps)?;
        let report = ValidationReport::build(&items, violations);
        debug!(
            %timeline_id,
            conflicts = report.conflicts.len(),
            warnings = report.warnings.len(),
            "validated timeline"
        );
        Ok(report)
    }

    pub async fn find_conflicts(&self, timeline_id: Uuid, user_id: Uuid) -> Result<Vec<Conflict>> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        Ok(detect_conflicts(&items))
    }

    pub async fn add_item_dependency(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        data: NewDependency,
    ) -> Result<Dependency> {
        self.editable_timeline(timeline_id, user_id).await?;
        if data.item_id == data.depends_on_id {
            return Err(PlannerError::invalid("an item cannot depend on itself"));
        }
        let items = self.store.list_items(timeline_id).await?;
        for endpoint in [data.item_id, data.depends_on_id] {
            if !items.iter().any(|item| item.id == endpoint) {
                return Err(PlannerError::invalid(format!(
                    "item {endpoint} is not part of timeline {timeline_id}"
                )));
            }
        }

        let existing = self.store.list_dependencies(timeline_id).await?;
        if existing
            .iter()
            .any(|dep| dep.item_id == data.item_id && dep.depends_on_id == data.depends_on_id)
        {
            return Err(PlannerError::invalid("dependency already exists"));
        }
        if would_create_cycle(&existing, data.item_id, data.depends_on_id) {
            return Err(PlannerError::invalid("dependency would create a cycle"));
        }

        let dependency = Dependency {
            id: Uuid::new_v4(),
            item_id: data.item_id,
            depends_on_id: data.depends_on_id,
            dependency_type: data.dependency_type,
            lag_minutes: data.lag_minutes,
            created_at: chrono::Utc::now(),
        };
        let dependency = self.store.insert_dependency(dependency).await?;
        info!(%timeline_id, dependency_id = %dependency.id, "added item dependency");
        Ok(dependency)
    }

    pub async fn list_dependencies(&self, timeline_id: Uuid, user_id: Uuid) -> Result<Vec<Dependency>> {
        self.readable_timeline(timeline_id, user_id).await?;
        self.store.list_dependencies(timeline_id).await
    }

    pub async fn remove_item_dependency(&self, dependency_id: Uuid, user_id: Uuid) -> Result<bool> {
        let dependency = self
            .store
            .get_dependency(dependency_id)
            .await?
            .ok_or_else(|| PlannerError::not_found(format!("dependency {dependency_id} not found")))?;
        let (_, timeline) = self.item_with_timeline(dependency.item_id).await?;
        self.ensure_can_edit(&timeline, user_id).await?;
        let removed = self.store.delete_dependency(dependency_id).await?;
        info!(%dependency_id, removed, "removed item dependency");
        Ok(removed)
    }

    pub async fn check_dependencies(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<DependencyViolation>> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        let deps = self.store.list_dependencies(timeline_id).await?;
        check_dependencies(&items, &deps)
    }

    // Progress

    pub async fn get_timeline_statistics(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
    ) -> Result<TimelineStatistics> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        Ok(compute_statistics(&items, self.clock.time_of_day()))
    }

    pub async fn get_timeline_progress(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
    ) -> Result<TimelineProgress> {
        let timeline = self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        Ok(compute_progress(&timeline, &items, self.clock.time_of_day()))
    }

    pub async fn get_overdue_items(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<TimelineItem>> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        Ok(overdue_items(&items, self.clock.time_of_day()))
    }

    pub async fn get_upcoming_items(
        &self,
        timeline_id: Uuid,
        user_id: Uuid,
        within_minutes: Option<i64>,
    ) -> Result<Vec<TimelineItem>> {
        self.readable_timeline(timeline_id, user_id).await?;
        let items = self.store.list_items(timeline_id).await?;
        let window = within_minutes.unwrap_or(DEFAULT_UPCOMING_WINDOW_MINUTES);
        Ok(upcoming_items(&items, self.clock.time_of_day(), window))
    }

    // Templates and generation

    pub async fn create_template(&self, user_id: Uuid, data: NewTemplate) -> Result<Template> {
        let template = build_template(user_id, data)?;
        let template = self.store.insert_template(template).await?;
        info!(template_id = %template.id, event_type = %template.event_type, "created template");
        Ok(template)
    }

    pub async fn list_templates(
        &self,
        user_id: Uuid,
        filter: TemplateFilter,
    ) -> Result<Page<Template>> {
        self.store.list_templates(user_id, &filter).await
    }

    /// Private templates of other users are reported as missing.
    pub async fn apply_template(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        template_id: Uuid,
    ) -> Result<Timeline> {
        let event = self.events.get_event_for_edit(event_id, user_id).await?;
        let template = self
            .store
            .get_template(template_id)
            .await?
            .filter(|template| template.is_visible_to(user_id))
            .ok_or_else(|| PlannerError::not_found(format!("template {template_id} not found")))?;

        let (timeline, items) = timeline_from_template(&template, &event, user_id)?;
        let count = items.len();
        let timeline = self
            .store
            .instantiate(timeline, items, Some(template.id))
            .await?;
        info!(%template_id, timeline_id = %timeline.id, items = count, "applied template");
        Ok(timeline)
    }

    pub async fn generate_ai_timeline(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        request: GenerateTimeline,
    ) -> Result<Timeline> {
        let event = self.events.get_event_for_edit(event_id, user_id).await?;
        let request = GenerationRequest::resolve(request, &event)?;

        let outcome = match tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(&request),
        )
        .await
        {
            Ok(Ok(items)) => check_blueprints(&items).map(|()| items),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PlannerError::Generation(format!(
                "generator did not answer within {:?}",
                self.generation_timeout
            ))),
        };
        let proposed = match outcome {
            Ok(items) => items,
            Err(err) if self.fallback_enabled => {
                warn!(%event_id, error = %err, "generator result unusable, using fallback schedule");
                FallbackGenerator::schedule(&request)?
            }
            Err(err) => return Err(err),
        };

        let (mut timeline, items) = generated_timeline(&event, user_id, &proposed)?;
        timeline.description = Some(format!(
            "Automatically generated timeline for {}",
            request.event_type
        ));
        let count = items.len();
        let timeline = self.store.instantiate(timeline, items, None).await?;
        info!(%event_id, timeline_id = %timeline.id, items = count, "generated timeline");
        Ok(timeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::InMemoryEventDirectory;
    use crate::model::{DependencyType, ItemBlueprint, ItemType, TemplateData};
    use crate::store::InMemoryTimelineStore;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use eventplan_core::FixedClock;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn on_day(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    struct Fixture {
        service: TimelineService,
        store: InMemoryTimelineStore,
        clock: Arc<FixedClock>,
        event: EventRecord,
        owner: Uuid,
        collaborator: Uuid,
        invitee: Uuid,
    }

    fn fixture() -> Fixture {
        let owner = Uuid::new_v4();
        let collaborator = Uuid::new_v4();
        let invitee = Uuid::new_v4();
        let mut event = EventRecord::new("Garden party", owner, on_day(18, 0));
        event.end_datetime = Some(on_day(22, 0));
        event.collaborators.push(collaborator);
        event.invitees.push(invitee);

        let directory = InMemoryEventDirectory::new();
        directory.insert(event.clone());
        let store = InMemoryTimelineStore::new();
        let clock = Arc::new(FixedClock::new(on_day(12, 0)));
        let service = TimelineService::new(Arc::new(store.clone()), Arc::new(directory))
            .with_clock(clock.clone());
        Fixture {
            service,
            store,
            clock,
            event,
            owner,
            collaborator,
            invitee,
        }
    }

    async fn timeline_for(f: &Fixture, user: Uuid) -> Timeline {
        f.service
            .create_timeline(f.event.id, user, CreateTimeline::titled("Run of show"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_timeline_applies_defaults_and_access() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        assert_eq!(
            (
                timeline.default_buffer_minutes,
                timeline.setup_buffer_minutes,
                timeline.cleanup_buffer_minutes
            ),
            (15, 30, 30)
        );

        assert!(f
            .service
            .create_timeline(f.event.id, f.collaborator, CreateTimeline::titled("Mine"))
            .await
            .is_ok());
        assert!(matches!(
            f.service
                .create_timeline(f.event.id, f.invitee, CreateTimeline::titled("Nope"))
                .await,
            Err(PlannerError::Authorization(_))
        ));
    }

    async fn total_minutes(store: &InMemoryTimelineStore, timeline_id: Uuid) -> i32 {
        store
            .get_timeline(timeline_id)
            .await
            .unwrap()
            .unwrap()
            .total_duration_minutes
    }

    #[tokio::test]
    async fn total_duration_follows_items() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let first = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("Doors", hm(18, 0)).lasting(30))
            .await
            .unwrap();
        f.service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("Dinner", hm(18, 30)).lasting(90))
            .await
            .unwrap();
        assert_eq!(total_minutes(&f.store, timeline.id).await, 120);

        f.service
            .update_timeline_item(
                first.id,
                f.owner,
                ItemUpdate {
                    duration_minutes: Some(45),
                    ..ItemUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(total_minutes(&f.store, timeline.id).await, 135);

        f.service.delete_timeline_item(first.id, f.owner).await.unwrap();
        assert_eq!(total_minutes(&f.store, timeline.id).await, 90);
    }

    #[tokio::test]
    async fn order_index_defaults_to_item_count() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let items = f
            .service
            .bulk_add_items(
                timeline.id,
                f.owner,
                vec![
                    NewTimelineItem::at("One", hm(9, 0)),
                    NewTimelineItem::at("Two", hm(10, 0)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(items[1].order_index, 1);
        let third = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("Three", hm(11, 0)))
            .await
            .unwrap();
        assert_eq!(third.order_index, 2);
    }

    #[tokio::test]
    async fn bulk_add_is_all_or_nothing() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let result = f
            .service
            .bulk_add_items(
                timeline.id,
                f.owner,
                vec![
                    NewTimelineItem::at("Fine", hm(9, 0)),
                    NewTimelineItem::at("Broken", hm(10, 0)).lasting(-5),
                ],
            )
            .await;
        assert!(matches!(result, Err(PlannerError::Validation(_))));
        assert!(f.store.list_items(timeline.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_rights_exclude_plain_collaborators() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let result = f
            .service
            .add_timeline_item(timeline.id, f.collaborator, NewTimelineItem::at("Sneaky", hm(9, 0)))
            .await;
        assert!(matches!(result, Err(PlannerError::Authorization(_))));

        let own = timeline_for(&f, f.collaborator).await;
        assert!(f
            .service
            .add_timeline_item(own.id, f.owner, NewTimelineItem::at("Event owner", hm(9, 0)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn completing_without_actuals_backfills_from_plan() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let item = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("Speech", hm(11, 0)).lasting(30))
            .await
            .unwrap();

        let done = f
            .service
            .update_item_status(item.id, f.owner, StatusUpdate::to(ItemStatus::Completed))
            .await
            .unwrap();
        assert_eq!(done.actual_end_time, Some(hm(12, 0)));
        assert_eq!(done.actual_start_time, Some(hm(11, 0)));

        let history = f.service.get_item_history(item.id, f.invitee).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, ChangeKind::StatusChange);
        assert_eq!(history[0].new_value.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn assignee_may_update_status() {
        let f = fixture();
        let helper = Uuid::new_v4();
        let timeline = timeline_for(&f, f.owner).await;
        let mut payload = NewTimelineItem::at("Bar service", hm(12, 0));
        payload.assigned_to = Some(helper);
        let item = f
            .service
            .add_timeline_item(timeline.id, f.owner, payload)
            .await
            .unwrap();

        f.clock.set(on_day(12, 5));
        let started = f
            .service
            .update_item_status(item.id, helper, StatusUpdate::to(ItemStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(started.actual_start_time, Some(hm(12, 5)));

        assert!(matches!(
            f.service
                .update_item_status(item.id, f.invitee, StatusUpdate::to(ItemStatus::Skipped))
                .await,
            Err(PlannerError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn reorder_rejects_foreign_items() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let other = timeline_for(&f, f.owner).await;
        let mine = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("Mine", hm(9, 0)))
            .await
            .unwrap();
        let theirs = f
            .service
            .add_timeline_item(other.id, f.owner, NewTimelineItem::at("Theirs", hm(9, 0)))
            .await
            .unwrap();

        let applied = f
            .service
            .reorder_timeline_items(
                timeline.id,
                f.owner,
                vec![
                    ItemOrder {
                        item_id: mine.id,
                        order_index: 7,
                    },
                    ItemOrder {
                        item_id: theirs.id,
                        order_index: 8,
                    },
                ],
            )
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(f.store.get_item(mine.id).await.unwrap().unwrap().order_index, 0);
    }

    #[tokio::test]
    async fn deleted_timelines_are_not_found() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        assert!(f.service.delete_timeline(timeline.id, f.owner).await.unwrap());
        assert!(matches!(
            f.service.get_timeline(timeline.id, f.owner).await,
            Err(PlannerError::NotFound(_))
        ));
        let page = f
            .service
            .list_event_timelines(f.event.id, f.owner, TimelineFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn search_only_returns_readable_timelines() {
        let f = fixture();
        timeline_for(&f, f.owner).await;
        f.service
            .create_timeline(f.event.id, f.collaborator, CreateTimeline::titled("Bar rota"))
            .await
            .unwrap();

        let outsider = Uuid::new_v4();
        let mut private = EventRecord::new("Board meeting", outsider, on_day(9, 0));
        private.event_type = Some("meeting".into());
        let directory = InMemoryEventDirectory::new();
        directory.insert(f.event.clone());
        directory.insert(private.clone());
        let service = TimelineService::new(Arc::new(f.store.clone()), Arc::new(directory));
        service
            .create_timeline(private.id, outsider, CreateTimeline::titled("Run of show"))
            .await
            .unwrap();

        let search = |query: &str| TimelineSearch {
            query: Some(query.into()),
            ..TimelineSearch::default()
        };
        let page = service.search_timelines(f.invitee, search("run of")).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].event_id, f.event.id);
        assert_eq!(
            service.search_timelines(outsider, search("run of")).await.unwrap().items[0].event_id,
            private.id
        );

        let meetings = TimelineSearch {
            event_type: Some("meeting".into()),
            ..TimelineSearch::default()
        };
        assert_eq!(service.search_timelines(f.owner, meetings).await.unwrap().total, 0);

        let mine = service
            .list_user_timelines(f.collaborator, TimelineSearch::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.items[0].title, "Bar rota");
    }

    #[tokio::test]
    async fn validation_reports_overlap_and_dependency_violation() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let a = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("A", hm(10, 0)))
            .await
            .unwrap();
        let b = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("B", hm(10, 30)))
            .await
            .unwrap();
        f.service
            .add_item_dependency(
                timeline.id,
                f.owner,
                NewDependency {
                    item_id: b.id,
                    depends_on_id: a.id,
                    dependency_type: DependencyType::FinishToStart,
                    lag_minutes: 0,
                },
            )
            .await
            .unwrap();

        let report = f.service.validate_timeline(timeline.id, f.invitee).await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.dependency_violations.len(), 1);
        assert_eq!(report.total_items, 2);
        assert_eq!(f.service.find_conflicts(timeline.id, f.owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dependency_rules_are_enforced() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        let other = timeline_for(&f, f.owner).await;
        let a = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("A", hm(9, 0)))
            .await
            .unwrap();
        let b = f
            .service
            .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at("B", hm(10, 0)))
            .await
            .unwrap();
        let outsider = f
            .service
            .add_timeline_item(other.id, f.owner, NewTimelineItem::at("X", hm(9, 0)))
            .await
            .unwrap();
        let edge = |item_id, depends_on_id| NewDependency {
            item_id,
            depends_on_id,
            dependency_type: DependencyType::default(),
            lag_minutes: 0,
        };

        let dep = f
            .service
            .add_item_dependency(timeline.id, f.owner, edge(b.id, a.id))
            .await
            .unwrap();
        for bad in [edge(a.id, a.id), edge(a.id, b.id), edge(b.id, a.id), edge(a.id, outsider.id)] {
            assert!(matches!(
                f.service.add_item_dependency(timeline.id, f.owner, bad).await,
                Err(PlannerError::Validation(_))
            ));
        }

        assert!(f.service.remove_item_dependency(dep.id, f.owner).await.unwrap());
        assert!(f
            .service
            .list_dependencies(timeline.id, f.owner)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn applying_a_template_materializes_items() {
        let f = fixture();
        let blueprint = |title: &str, offset| ItemBlueprint {
            title: title.into(),
            description: None,
            item_type: ItemType::Activity,
            start_time_offset_minutes: offset,
            duration_minutes: 60,
        };
        let template = f
            .service
            .create_template(
                f.owner,
                NewTemplate {
                    name: "Party".into(),
                    description: None,
                    event_type: "party".into(),
                    is_public: false,
                    default_duration_hours: None,
                    setup_time_minutes: None,
                    cleanup_time_minutes: None,
                    template_data: TemplateData {
                        items: vec![blueprint("Drinks", 0), blueprint("Games", 120)],
                    },
                },
            )
            .await
            .unwrap();

        let timeline = f
            .service
            .apply_template(f.event.id, f.owner, template.id)
            .await
            .unwrap();
        assert_eq!(timeline.title, "Party - Garden party");
        assert_eq!(timeline.total_duration_minutes, 120);

        let items = f.store.list_items(timeline.id).await.unwrap();
        assert_eq!(items[0].start_time, hm(18, 0));
        assert_eq!(items[1].start_time, hm(20, 0));
        assert_eq!(items[1].end_time, Some(hm(21, 0)));
        let stored = f.store.get_template(template.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 1);

        assert!(matches!(
            f.service
                .apply_template(f.event.id, f.collaborator, template.id)
                .await,
            Err(PlannerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_template_offsets_are_rejected() {
        let f = fixture();
        let far_future = ItemBlueprint {
            title: "Someday".into(),
            description: None,
            item_type: ItemType::Activity,
            start_time_offset_minutes: i64::MAX,
            duration_minutes: 60,
        };
        let payload = NewTemplate {
            name: "Broken".into(),
            description: None,
            event_type: "party".into(),
            is_public: true,
            default_duration_hours: None,
            setup_time_minutes: None,
            cleanup_time_minutes: None,
            template_data: TemplateData {
                items: vec![far_future.clone()],
            },
        };
        assert!(matches!(
            f.service.create_template(f.owner, payload.clone()).await,
            Err(PlannerError::Validation(_))
        ));

        let mut stored = build_template(f.owner, NewTemplate {
            template_data: TemplateData::default(),
            ..payload
        })
        .unwrap();
        stored.template_data.items.push(far_future);
        let stored = f.store.insert_template(stored).await.unwrap();
        assert!(matches!(
            f.service.apply_template(f.event.id, f.owner, stored.id).await,
            Err(PlannerError::Validation(_))
        ));
        let untouched = f.store.get_template(stored.id).await.unwrap().unwrap();
        assert_eq!(untouched.usage_count, 0);
    }

    #[tokio::test]
    async fn oversized_items_keep_the_total_consistent() {
        let f = fixture();
        let timeline = timeline_for(&f, f.owner).await;
        for _ in 0..2 {
            let result = f
                .service
                .add_timeline_item(
                    timeline.id,
                    f.owner,
                    NewTimelineItem::at("Endless", hm(9, 0)).lasting(i32::MAX),
                )
                .await;
            assert!(matches!(result, Err(PlannerError::Validation(_))));
        }
        assert!(f.store.list_items(timeline.id).await.unwrap().is_empty());
        assert_eq!(total_minutes(&f.store, timeline.id).await, 0);
    }

    struct BrokenGenerator;

    #[async_trait]
    impl TimelineGenerator for BrokenGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<ItemBlueprint>> {
            Err(PlannerError::Generation("service unavailable".into()))
        }
    }

    #[tokio::test]
    async fn generation_falls_back_when_the_generator_fails() {
        let f = fixture();
        let service = f.service.clone().with_generator(Arc::new(BrokenGenerator));
        let timeline = service
            .generate_ai_timeline(f.event.id, f.owner, GenerateTimeline::default())
            .await
            .unwrap();
        assert!(timeline.auto_generated);
        assert_eq!(timeline.title, "AI Generated Timeline - Garden party");
        let items = f.store.list_items(timeline.id).await.unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].item_type, ItemType::Setup);

        let strict = service.with_fallback(false);
        assert!(matches!(
            strict
                .generate_ai_timeline(f.event.id, f.owner, GenerateTimeline::default())
                .await,
            Err(PlannerError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn progress_uses_the_injected_clock() {
        let f = fixture();
        let mut timeline = timeline_for(&f, f.owner).await;
        timeline = f
            .service
            .update_timeline(
                timeline.id,
                f.owner,
                TimelineUpdate {
                    start_time: Some(hm(10, 0)),
                    end_time: Some(hm(14, 0)),
                    ..TimelineUpdate::default()
                },
            )
            .await
            .unwrap();
        for (title, hour) in [("A", 10), ("B", 11), ("C", 12), ("D", 13)] {
            f.service
                .add_timeline_item(timeline.id, f.owner, NewTimelineItem::at(title, hm(hour, 0)))
                .await
                .unwrap();
        }
        let progress = f
            .service
            .get_timeline_progress(timeline.id, f.owner)
            .await
            .unwrap();
        assert_eq!(progress.time_progress_percentage, 50.0);
        assert!(!progress.is_on_schedule);
        assert_eq!(progress.statistics.overdue_items, 1);
        assert_eq!(progress.next_items.len(), 3);

        let overdue = f.service.get_overdue_items(timeline.id, f.owner).await.unwrap();
        assert_eq!(overdue[0].title, "A");
        let upcoming = f
            .service
            .get_upcoming_items(timeline.id, f.owner, Some(30))
            .await
            .unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].title, "C");
    }
}
