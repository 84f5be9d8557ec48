use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eventplan_core::errors::{PlannerError, Result};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{Dependency, ItemChange, Page, Template, Timeline, TimelineItem};
use crate::requests::{ItemOrder, TemplateFilter, TimelineFilter, TimelineSearch};

/// Persistence boundary of the timeline engine.
///
/// Every operation that mutates items also recomputes the owning timeline's
/// `total_duration_minutes` within the same unit of work.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn insert_timeline(&self, timeline: Timeline) -> Result<Timeline>;
    async fn get_timeline(&self, timeline_id: Uuid) -> Result<Option<Timeline>>;
    async fn list_event_timelines(
        &self,
        event_id: Uuid,
        filter: &TimelineFilter,
    ) -> Result<Page<Timeline>>;
    /// Active timelines of `event_ids` matching `search`, newest first.
    async fn search_timelines(
        &self,
        event_ids: &[Uuid],
        search: &TimelineSearch,
    ) -> Result<Page<Timeline>>;
    async fn update_timeline(&self, timeline: Timeline) -> Result<Timeline>;

    /// Items of a timeline ordered by `(order_index, start_time)`.
    async fn list_items(&self, timeline_id: Uuid) -> Result<Vec<TimelineItem>>;
    async fn get_item(&self, item_id: Uuid) -> Result<Option<TimelineItem>>;
    /// Inserts all items or none of them.
    async fn insert_items(
        &self,
        timeline_id: Uuid,
        items: Vec<TimelineItem>,
    ) -> Result<Vec<TimelineItem>>;
    /// Persists an item and appends its audit records.
    async fn update_item(&self, item: TimelineItem, changes: Vec<ItemChange>)
        -> Result<TimelineItem>;
    /// Removes an item with its dependency edges and audit records.
    async fn delete_item(&self, item_id: Uuid) -> Result<bool>;
    /// Applies every order or nothing.
    ///
    /// Returns `false` when an id is foreign or repeated, or when applying an
    /// order fails part-way; nothing is changed in either case. `Err` is kept
    /// for failures to reach the store at all.
    async fn reorder_items(&self, timeline_id: Uuid, orders: &[ItemOrder]) -> Result<bool>;

    async fn insert_dependency(&self, dependency: Dependency) -> Result<Dependency>;
    async fn get_dependency(&self, dependency_id: Uuid) -> Result<Option<Dependency>>;
    async fn list_dependencies(&self, timeline_id: Uuid) -> Result<Vec<Dependency>>;
    async fn delete_dependency(&self, dependency_id: Uuid) -> Result<bool>;

    async fn insert_template(&self, template: Template) -> Result<Template>;
    async fn get_template(&self, template_id: Uuid) -> Result<Option<Template>>;
    /// Public templates plus the ones owned by `viewer`.
    async fn list_templates(&self, viewer: Uuid, filter: &TemplateFilter)
        -> Result<Page<Template>>;

    /// Creates a timeline with its items and bumps the template's usage count.
    async fn instantiate(
        &self,
        timeline: Timeline,
        items: Vec<TimelineItem>,
        template_id: Option<Uuid>,
    ) -> Result<Timeline>;

    async fn list_changes(&self, item_id: Uuid) -> Result<Vec<ItemChange>>;
}

/// Checks that `orders` only names items of the timeline, each at most once.
pub fn orders_are_consistent(orders: &[ItemOrder], owned: &HashSet<Uuid>) -> bool {
    let mut seen = HashSet::with_capacity(orders.len());
    orders
        .iter()
        .all(|order| owned.contains(&order.item_id) && seen.insert(order.item_id))
}

/// Sums item durations, failing instead of overflowing the stored total.
pub fn total_duration<'a>(items: impl IntoIterator<Item = &'a TimelineItem>) -> Result<i32> {
    let total: i64 = items
        .into_iter()
        .map(|item| i64::from(item.duration_minutes))
        .sum();
    checked_total(total)
}

/// Narrows a summed duration to the stored column width.
pub fn checked_total(total: i64) -> Result<i32> {
    i32::try_from(total).map_err(|_| {
        PlannerError::invalid(format!("total duration of {total} minutes is too large"))
    })
}

/// Sorts items by `(order_index, start_time)`.
pub fn sort_items(items: &mut [TimelineItem]) {
    items.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then(a.start_time.cmp(&b.start_time))
    });
}

#[derive(Default)]
struct StoreState {
    timelines: HashMap<Uuid, Timeline>,
    items: HashMap<Uuid, TimelineItem>,
    dependencies: HashMap<Uuid, Dependency>,
    templates: HashMap<Uuid, Template>,
    changes: Vec<ItemChange>,
}

impl StoreState {
    fn items_of(&self, timeline_id: Uuid) -> Vec<TimelineItem> {
        let mut items: Vec<TimelineItem> = self
            .items
            .values()
            .filter(|item| item.timeline_id == timeline_id)
            .cloned()
            .collect();
        sort_items(&mut items);
        items
    }

    /// Total duration of the timeline once `incoming` replaces or joins its items.
    fn duration_with(&self, timeline_id: Uuid, incoming: &[TimelineItem]) -> Result<i32> {
        let replaced: HashSet<Uuid> = incoming.iter().map(|item| item.id).collect();
        let kept = self
            .items
            .values()
            .filter(|item| item.timeline_id == timeline_id && !replaced.contains(&item.id));
        total_duration(kept.chain(incoming.iter()))
    }

    fn set_duration(&mut self, timeline_id: Uuid, total: i32) {
        if let Some(timeline) = self.timelines.get_mut(&timeline_id) {
            timeline.total_duration_minutes = total;
            timeline.updated_at = Utc::now();
        }
    }
}

/// In-memory timeline store guarded by a single lock.
#[derive(Default, Clone)]
pub struct InMemoryTimelineStore {
    inner: Arc<RwLock<StoreState>>,
}

impl InMemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimelineStore for InMemoryTimelineStore {
    async fn insert_timeline(&self, timeline: Timeline) -> Result<Timeline> {
        let mut state = self.inner.write();
        state.timelines.insert(timeline.id, timeline.clone());
        Ok(timeline)
    }

    async fn get_timeline(&self, timeline_id: Uuid) -> Result<Option<Timeline>> {
        Ok(self.inner.read().timelines.get(&timeline_id).cloned())
    }

    async fn list_event_timelines(
        &self,
        event_id: Uuid,
        filter: &TimelineFilter,
    ) -> Result<Page<Timeline>> {
        let state = self.inner.read();
        let mut matching: Vec<Timeline> = state
            .timelines
            .values()
            .filter(|timeline| timeline.event_id == event_id && filter.matches(timeline))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let (page, per_page) = filter.page_bounds();
        Ok(Page::paginate(matching, page, per_page))
    }

    async fn search_timelines(
        &self,
        event_ids: &[Uuid],
        search: &TimelineSearch,
    ) -> Result<Page<Timeline>> {
        let visible: HashSet<Uuid> = event_ids.iter().copied().collect();
        let state = self.inner.read();
        let mut matching: Vec<Timeline> = state
            .timelines
            .values()
            .filter(|timeline| visible.contains(&timeline.event_id) && search.matches(timeline))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let (page, per_page) = search.page_bounds();
        Ok(Page::paginate(matching, page, per_page))
    }

    async fn update_timeline(&self, timeline: Timeline) -> Result<Timeline> {
        let mut state = self.inner.write();
        let stored = state
            .timelines
            .get_mut(&timeline.id)
            .ok_or_else(|| PlannerError::not_found(format!("timeline {} not found", timeline.id)))?;
        let total = stored.total_duration_minutes;
        *stored = timeline;
        stored.total_duration_minutes = total;
        Ok(stored.clone())
    }

    async fn list_items(&self, timeline_id: Uuid) -> Result<Vec<TimelineItem>> {
        Ok(self.inner.read().items_of(timeline_id))
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<TimelineItem>> {
        Ok(self.inner.read().items.get(&item_id).cloned())
    }

    async fn insert_items(
        &self,
        timeline_id: Uuid,
        items: Vec<TimelineItem>,
    ) -> Result<Vec<TimelineItem>> {
        let mut state = self.inner.write();
        if !state.timelines.contains_key(&timeline_id) {
            return Err(PlannerError::not_found(format!(
                "timeline {timeline_id} not found"
            )));
        }
        if let Some(foreign) = items.iter().find(|item| item.timeline_id != timeline_id) {
            return Err(PlannerError::invalid(format!(
                "item {} belongs to another timeline",
                foreign.id
            )));
        }
        let total = state.duration_with(timeline_id, &items)?;
        for item in &items {
            state.items.insert(item.id, item.clone());
        }
        state.set_duration(timeline_id, total);
        Ok(items)
    }

    async fn update_item(
        &self,
        item: TimelineItem,
        changes: Vec<ItemChange>,
    ) -> Result<TimelineItem> {
        let mut state = self.inner.write();
        if !state.items.contains_key(&item.id) {
            return Err(PlannerError::not_found(format!("item {} not found", item.id)));
        }
        let timeline_id = item.timeline_id;
        let total = state.duration_with(timeline_id, std::slice::from_ref(&item))?;
        state.items.insert(item.id, item.clone());
        state.changes.extend(changes);
        state.set_duration(timeline_id, total);
        Ok(item)
    }

    async fn delete_item(&self, item_id: Uuid) -> Result<bool> {
        let mut state = self.inner.write();
        let Some(item) = state.items.remove(&item_id) else {
            return Ok(false);
        };
        state
            .dependencies
            .retain(|_, dep| dep.item_id != item_id && dep.depends_on_id != item_id);
        state.changes.retain(|change| change.item_id != item_id);
        let total = state.duration_with(item.timeline_id, &[])?;
        state.set_duration(item.timeline_id, total);
        Ok(true)
    }

    async fn reorder_items(&self, timeline_id: Uuid, orders: &[ItemOrder]) -> Result<bool> {
        let mut state = self.inner.write();
        let owned: HashSet<Uuid> = state
            .items
            .values()
            .filter(|item| item.timeline_id == timeline_id)
            .map(|item| item.id)
            .collect();
        if !orders_are_consistent(orders, &owned) {
            return Ok(false);
        }
        let now = Utc::now();
        for order in orders {
            if let Some(item) = state.items.get_mut(&order.item_id) {
                item.order_index = order.order_index;
                item.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn insert_dependency(&self, dependency: Dependency) -> Result<Dependency> {
        let mut state = self.inner.write();
        for endpoint in [dependency.item_id, dependency.depends_on_id] {
            if !state.items.contains_key(&endpoint) {
                return Err(PlannerError::not_found(format!("item {endpoint} not found")));
            }
        }
        state.dependencies.insert(dependency.id, dependency.clone());
        Ok(dependency)
    }

    async fn get_dependency(&self, dependency_id: Uuid) -> Result<Option<Dependency>> {
        Ok(self.inner.read().dependencies.get(&dependency_id).cloned())
    }

    async fn list_dependencies(&self, timeline_id: Uuid) -> Result<Vec<Dependency>> {
        let state = self.inner.read();
        let mut deps: Vec<Dependency> = state
            .dependencies
            .values()
            .filter(|dep| {
                state
                    .items
                    .get(&dep.item_id)
                    .map_or(false, |item| item.timeline_id == timeline_id)
            })
            .cloned()
            .collect();
        deps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(deps)
    }

    async fn delete_dependency(&self, dependency_id: Uuid) -> Result<bool> {
        Ok(self.inner.write().dependencies.remove(&dependency_id).is_some())
    }

    async fn insert_template(&self, template: Template) -> Result<Template> {
        self.inner
            .write()
            .templates
            .insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, template_id: Uuid) -> Result<Option<Template>> {
        Ok(self.inner.read().templates.get(&template_id).cloned())
    }

    async fn list_templates(
        &self,
        viewer: Uuid,
        filter: &TemplateFilter,
    ) -> Result<Page<Template>> {
        let state = self.inner.read();
        let mut matching: Vec<Template> = state
            .templates
            .values()
            .filter(|template| template.is_visible_to(viewer))
            .filter(|template| {
                filter
                    .event_type
                    .as_deref()
                    .map_or(true, |kind| template.event_type == kind)
            })
            .filter(|template| filter.creator_id.map_or(true, |id| template.creator_id == id))
            .filter(|template| filter.is_public.map_or(true, |flag| template.is_public == flag))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        let (page, per_page) = filter.page_bounds();
        Ok(Page::paginate(matching, page, per_page))
    }

    async fn instantiate(
        &self,
        mut timeline: Timeline,
        items: Vec<TimelineItem>,
        template_id: Option<Uuid>,
    ) -> Result<Timeline> {
        timeline.total_duration_minutes = total_duration(&items)?;
        let mut state = self.inner.write();
        if let Some(template_id) = template_id {
            let template = state.templates.get_mut(&template_id).ok_or_else(|| {
                PlannerError::not_found(format!("template {template_id} not found"))
            })?;
            template.usage_count += 1;
            template.updated_at = Utc::now();
        }
        state.timelines.insert(timeline.id, timeline.clone());
        for item in items {
            state.items.insert(item.id, item);
        }
        Ok(timeline)
    }

    async fn list_changes(&self, item_id: Uuid) -> Result<Vec<ItemChange>> {
        let state = self.inner.read();
        Ok(state
            .changes
            .iter()
            .filter(|change| change.item_id == item_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKind, DependencyType};
    use chrono::NaiveTime;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn seeded() -> (InMemoryTimelineStore, Timeline) {
        let store = InMemoryTimelineStore::new();
        let timeline = store
            .insert_timeline(Timeline::new(Uuid::new_v4(), Uuid::new_v4(), "Gala"))
            .await
            .unwrap();
        (store, timeline)
    }

    #[tokio::test]
    async fn duration_tracks_item_mutations() {
        let (store, timeline) = seeded().await;
        let a = TimelineItem::new(timeline.id, "Doors", hm(18, 0), 30);
        let b = TimelineItem::new(timeline.id, "Dinner", hm(18, 30), 90);
        store
            .insert_items(timeline.id, vec![a.clone(), b.clone()])
            .await
            .unwrap();
        let total = |store: &InMemoryTimelineStore| {
            store.inner.read().timelines[&timeline.id].total_duration_minutes
        };
        assert_eq!(total(&store), 120);

        let mut longer = b.clone();
        longer.duration_minutes = 120;
        store.update_item(longer, Vec::new()).await.unwrap();
        assert_eq!(total(&store), 150);

        assert!(store.delete_item(a.id).await.unwrap());
        assert_eq!(total(&store), 120);
        assert!(!store.delete_item(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn overflowing_totals_are_rejected_before_storing() {
        let (store, timeline) = seeded().await;
        let first = TimelineItem::new(timeline.id, "Long", hm(0, 0), i32::MAX);
        store.insert_items(timeline.id, vec![first]).await.unwrap();

        let second = TimelineItem::new(timeline.id, "Longer", hm(1, 0), i32::MAX);
        let result = store.insert_items(timeline.id, vec![second.clone()]).await;
        assert!(matches!(result, Err(PlannerError::Validation(_))));
        assert!(store.get_item(second.id).await.unwrap().is_none());
        let stored = store.get_timeline(timeline.id).await.unwrap().unwrap();
        assert_eq!(stored.total_duration_minutes, i32::MAX);

        let shell = Timeline::new(timeline.event_id, timeline.creator_id, "Copy");
        let items = vec![
            TimelineItem::new(shell.id, "A", hm(0, 0), i32::MAX),
            TimelineItem::new(shell.id, "B", hm(1, 0), 1),
        ];
        assert!(store.instantiate(shell.clone(), items, None).await.is_err());
        assert!(store.get_timeline(shell.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_is_limited_to_visible_events() {
        let store = InMemoryTimelineStore::new();
        let visible_event = Uuid::new_v4();
        let hidden_event = Uuid::new_v4();
        let creator = Uuid::new_v4();
        for (event_id, title) in [
            (visible_event, "Ceremony plan"),
            (visible_event, "Catering"),
            (hidden_event, "Secret ceremony"),
        ] {
            store
                .insert_timeline(Timeline::new(event_id, creator, title))
                .await
                .unwrap();
        }

        let search = TimelineSearch {
            query: Some("CEREMONY".into()),
            ..TimelineSearch::default()
        };
        let page = store.search_timelines(&[visible_event], &search).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "Ceremony plan");

        let everything = store
            .search_timelines(&[visible_event, hidden_event], &TimelineSearch::default())
            .await
            .unwrap();
        assert_eq!(everything.total, 3);
        assert!(store
            .search_timelines(&[], &TimelineSearch::default())
            .await
            .unwrap()
            .items
            .is_empty());
    }

    #[tokio::test]
    async fn items_are_listed_in_plan_order() {
        let (store, timeline) = seeded().await;
        let mut late = TimelineItem::new(timeline.id, "Late", hm(20, 0), 30);
        late.order_index = 0;
        let mut early = TimelineItem::new(timeline.id, "Early", hm(18, 0), 30);
        early.order_index = 0;
        let mut last = TimelineItem::new(timeline.id, "Last", hm(9, 0), 30);
        last.order_index = 1;
        store
            .insert_items(timeline.id, vec![last, late, early])
            .await
            .unwrap();

        let titles: Vec<String> = store
            .list_items(timeline.id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(titles, ["Early", "Late", "Last"]);
    }

    #[tokio::test]
    async fn reorder_is_all_or_nothing() {
        let (store, timeline) = seeded().await;
        let a = TimelineItem::new(timeline.id, "A", hm(10, 0), 30);
        let b = TimelineItem::new(timeline.id, "B", hm(11, 0), 30);
        store
            .insert_items(timeline.id, vec![a.clone(), b.clone()])
            .await
            .unwrap();

        let foreign = ItemOrder {
            item_id: Uuid::new_v4(),
            order_index: 0,
        };
        let orders = [
            ItemOrder {
                item_id: a.id,
                order_index: 5,
            },
            foreign,
        ];
        assert!(!store.reorder_items(timeline.id, &orders).await.unwrap());
        assert_eq!(store.get_item(a.id).await.unwrap().unwrap().order_index, 0);

        let duplicated = [
            ItemOrder {
                item_id: a.id,
                order_index: 1,
            },
            ItemOrder {
                item_id: a.id,
                order_index: 2,
            },
        ];
        assert!(!store.reorder_items(timeline.id, &duplicated).await.unwrap());

        let swap = [
            ItemOrder {
                item_id: a.id,
                order_index: 1,
            },
            ItemOrder {
                item_id: b.id,
                order_index: 0,
            },
        ];
        assert!(store.reorder_items(timeline.id, &swap).await.unwrap());
        let first = &store.list_items(timeline.id).await.unwrap()[0];
        assert_eq!(first.id, b.id);
    }

    #[tokio::test]
    async fn deleting_an_item_cascades() {
        let (store, timeline) = seeded().await;
        let a = TimelineItem::new(timeline.id, "A", hm(10, 0), 30);
        let b = TimelineItem::new(timeline.id, "B", hm(11, 0), 30);
        store
            .insert_items(timeline.id, vec![a.clone(), b.clone()])
            .await
            .unwrap();
        store
            .insert_dependency(Dependency {
                id: Uuid::new_v4(),
                item_id: b.id,
                depends_on_id: a.id,
                dependency_type: DependencyType::FinishToStart,
                lag_minutes: 0,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let change = ItemChange::new(
            a.id,
            timeline.creator_id,
            ChangeKind::StatusChange,
            Some("pending".into()),
            Some("in_progress".into()),
        );
        store.update_item(a.clone(), vec![change]).await.unwrap();

        assert!(store.delete_item(a.id).await.unwrap());
        assert!(store.list_dependencies(timeline.id).await.unwrap().is_empty());
        assert!(store.list_changes(a.id).await.unwrap().is_empty());
    }
}
