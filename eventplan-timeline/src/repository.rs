use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use eventplan_core::config::CoreConfig;
use eventplan_core::db::{DatabaseMigrator, DatabasePool};
use eventplan_core::errors::{PlannerError, Result};
use eventplan_core::serde_utils::{from_json_str, to_json};
use serde_json::Value;
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use tracing::warn;
use uuid::Uuid;

use crate::access::{EventAccess, EventRecord};
use crate::model::{Dependency, ItemChange, Page, Template, TemplateData, Timeline, TimelineItem};
use crate::requests::{ItemOrder, TemplateFilter, TimelineFilter, TimelineSearch};
use crate::store::{checked_total, orders_are_consistent, total_duration, TimelineStore};

const TIMELINE_COLUMNS: &str = "id, event_id, creator_id, template_id, title, description, \
     is_active, is_template, auto_generated, start_time, end_time, total_duration_minutes, \
     default_buffer_minutes, setup_buffer_minutes, cleanup_buffer_minutes, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, timeline_id, title, description, item_type, start_time, end_time, \
     duration_minutes, buffer_minutes, status, actual_start_time, actual_end_time, order_index, \
     is_critical, is_flexible, requirements, notes, location, assigned_to, task_id, \
     created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, description, event_type, is_public, is_verified, \
     usage_count, default_duration_hours, setup_time_minutes, cleanup_time_minutes, \
     template_data, creator_id, created_at, updated_at";

/// Postgres-backed timeline store.
#[derive(Clone)]
pub struct PgTimelineStore {
    pool: DatabasePool,
}

impl PgTimelineStore {
    /// Connects to the database using the supplied configuration and ensures migrations ran.
    pub async fn from_config(config: &CoreConfig) -> Result<Self> {
        let pool = DatabasePool::connect(config).await?;
        Self::from_pool(pool).await
    }

    /// Builds the store from an existing database pool.
    pub async fn from_pool(pool: DatabasePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations(&store.pool).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    async fn recompute_duration(tx: &mut Transaction<'_, Postgres>, timeline_id: Uuid) -> Result<()> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(duration_minutes), 0)::BIGINT FROM timeline_items WHERE timeline_id = $1",
        )
        .bind(timeline_id)
        .fetch_one(&mut **tx)
        .await?;
        sqlx::query(
            "UPDATE event_timelines SET total_duration_minutes = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(timeline_id)
        .bind(checked_total(total)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_item_tx(tx: &mut Transaction<'_, Postgres>, item: &TimelineItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO timeline_items (
                id, timeline_id, title, description, item_type, start_time, end_time,
                duration_minutes, buffer_minutes, status, actual_start_time, actual_end_time,
                order_index, is_critical, is_flexible, requirements, notes, location,
                assigned_to, task_id, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22
            )
            "#,
        )
        .bind(item.id)
        .bind(item.timeline_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.item_type.as_str())
        .bind(item.start_time)
        .bind(item.end_time)
        .bind(item.duration_minutes)
        .bind(item.buffer_minutes)
        .bind(item.status.as_str())
        .bind(item.actual_start_time)
        .bind(item.actual_end_time)
        .bind(item.order_index)
        .bind(item.is_critical)
        .bind(item.is_flexible)
        .bind(to_json(&item.requirements)?)
        .bind(&item.notes)
        .bind(&item.location)
        .bind(item.assigned_to)
        .bind(item.task_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_timeline_tx(
        tx: &mut Transaction<'_, Postgres>,
        timeline: &Timeline,
    ) -> Result<Timeline> {
        let sql = format!(
            r#"
            INSERT INTO event_timelines (
                id, event_id, creator_id, template_id, title, description,
                is_active, is_template, auto_generated, start_time, end_time,
                total_duration_minutes, default_buffer_minutes, setup_buffer_minutes,
                cleanup_buffer_minutes, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14,
                $15, $16, $17
            )
            RETURNING {TIMELINE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TimelineRow>(&sql)
            .bind(timeline.id)
            .bind(timeline.event_id)
            .bind(timeline.creator_id)
            .bind(timeline.template_id)
            .bind(&timeline.title)
            .bind(&timeline.description)
            .bind(timeline.is_active)
            .bind(timeline.is_template)
            .bind(timeline.auto_generated)
            .bind(timeline.start_time)
            .bind(timeline.end_time)
            .bind(timeline.total_duration_minutes)
            .bind(timeline.default_buffer_minutes)
            .bind(timeline.setup_buffer_minutes)
            .bind(timeline.cleanup_buffer_minutes)
            .bind(timeline.created_at)
            .bind(timeline.updated_at)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.into())
    }

    fn push_timeline_filters(
        builder: &mut QueryBuilder<'_, Postgres>,
        event_id: Uuid,
        filter: &TimelineFilter,
    ) {
        builder.push(" WHERE is_active = TRUE AND event_id = ");
        builder.push_bind(event_id);
        if let Some(creator_id) = filter.creator_id {
            builder.push(" AND creator_id = ");
            builder.push_bind(creator_id);
        }
        if let Some(is_template) = filter.is_template {
            builder.push(" AND is_template = ");
            builder.push_bind(is_template);
        }
        if let Some(auto_generated) = filter.auto_generated {
            builder.push(" AND auto_generated = ");
            builder.push_bind(auto_generated);
        }
    }

    fn push_search_filters(
        builder: &mut QueryBuilder<'_, Postgres>,
        event_ids: &[Uuid],
        search: &TimelineSearch,
    ) {
        builder.push(" WHERE is_active = TRUE AND event_id = ANY(");
        builder.push_bind(event_ids.to_vec());
        builder.push(")");
        if let Some(creator_id) = search.creator_id {
            builder.push(" AND creator_id = ");
            builder.push_bind(creator_id);
        }
        if let Some(event_id) = search.event_id {
            builder.push(" AND event_id = ");
            builder.push_bind(event_id);
        }
        if let Some(text) = search.text() {
            let pattern = like_pattern(text);
            builder.push(" AND (title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR description ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
    }

    fn push_template_filters(
        builder: &mut QueryBuilder<'_, Postgres>,
        viewer: Uuid,
        filter: &TemplateFilter,
    ) {
        builder.push(" WHERE (is_public = TRUE OR creator_id = ");
        builder.push_bind(viewer);
        builder.push(")");
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND event_type = ");
            builder.push_bind(event_type.clone());
        }
        if let Some(creator_id) = filter.creator_id {
            builder.push(" AND creator_id = ");
            builder.push_bind(creator_id);
        }
        if let Some(is_public) = filter.is_public {
            builder.push(" AND is_public = ");
            builder.push_bind(is_public);
        }
    }
}

#[async_trait]
impl DatabaseMigrator for PgTimelineStore {
    async fn run_migrations(&self, pool: &DatabasePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool.inner())
            .await
            .map_err(|err| PlannerError::Storage(err.to_string()))
    }
}

#[async_trait]
impl TimelineStore for PgTimelineStore {
    async fn insert_timeline(&self, timeline: Timeline) -> Result<Timeline> {
        let mut tx = self.pool.inner().begin().await?;
        let stored = Self::insert_timeline_tx(&mut tx, &timeline).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_timeline(&self, timeline_id: Uuid) -> Result<Option<Timeline>> {
        let sql = format!("SELECT {TIMELINE_COLUMNS} FROM event_timelines WHERE id = $1");
        let row = sqlx::query_as::<_, TimelineRow>(&sql)
            .bind(timeline_id)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_event_timelines(
        &self,
        event_id: Uuid,
        filter: &TimelineFilter,
    ) -> Result<Page<Timeline>> {
        let (page, per_page) = filter.page_bounds();

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM event_timelines");
        Self::push_timeline_filters(&mut count, event_id, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.inner())
            .await?;

        let mut builder = QueryBuilder::new(format!("SELECT {TIMELINE_COLUMNS} FROM event_timelines"));
        Self::push_timeline_filters(&mut builder, event_id, filter);
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(i64::from(per_page));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(page - 1) * i64::from(per_page));

        let rows = builder
            .build_query_as::<TimelineRow>()
            .fetch_all(self.pool.inner())
            .await?;
        let items = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(items, total.max(0) as u64, page, per_page))
    }

    async fn search_timelines(
        &self,
        event_ids: &[Uuid],
        search: &TimelineSearch,
    ) -> Result<Page<Timeline>> {
        let (page, per_page) = search.page_bounds();
        if event_ids.is_empty() {
            return Ok(Page::new(Vec::new(), 0, page, per_page));
        }

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM event_timelines");
        Self::push_search_filters(&mut count, event_ids, search);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.inner())
            .await?;

        let mut builder = QueryBuilder::new(format!("SELECT {TIMELINE_COLUMNS} FROM event_timelines"));
        Self::push_search_filters(&mut builder, event_ids, search);
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(i64::from(per_page));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(page - 1) * i64::from(per_page));

        let rows = builder
            .build_query_as::<TimelineRow>()
            .fetch_all(self.pool.inner())
            .await?;
        let items = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(items, total.max(0) as u64, page, per_page))
    }

    async fn update_timeline(&self, timeline: Timeline) -> Result<Timeline> {
        let sql = format!(
            r#"
            UPDATE event_timelines
            SET title = $2, description = $3, is_active = $4, is_template = $5,
                start_time = $6, end_time = $7, default_buffer_minutes = $8,
                setup_buffer_minutes = $9, cleanup_buffer_minutes = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {TIMELINE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TimelineRow>(&sql)
            .bind(timeline.id)
            .bind(&timeline.title)
            .bind(&timeline.description)
            .bind(timeline.is_active)
            .bind(timeline.is_template)
            .bind(timeline.start_time)
            .bind(timeline.end_time)
            .bind(timeline.default_buffer_minutes)
            .bind(timeline.setup_buffer_minutes)
            .bind(timeline.cleanup_buffer_minutes)
            .fetch_optional(self.pool.inner())
            .await?
            .ok_or_else(|| PlannerError::not_found(format!("timeline {} not found", timeline.id)))?;
        Ok(row.into())
    }

    async fn list_items(&self, timeline_id: Uuid) -> Result<Vec<TimelineItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM timeline_items WHERE timeline_id = $1 \
             ORDER BY order_index, start_time"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(timeline_id)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<TimelineItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM timeline_items WHERE id = $1");
        let row = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(item_id)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_items(
        &self,
        timeline_id: Uuid,
        items: Vec<TimelineItem>,
    ) -> Result<Vec<TimelineItem>> {
        let mut tx = self.pool.inner().begin().await?;
        for item in &items {
            if item.timeline_id != timeline_id {
                return Err(PlannerError::invalid(format!(
                    "item {} belongs to another timeline",
                    item.id
                )));
            }
            Self::insert_item_tx(&mut tx, item).await?;
        }
        Self::recompute_duration(&mut tx, timeline_id).await?;
        tx.commit().await?;
        Ok(items)
    }

    async fn update_item(
        &self,
        item: TimelineItem,
        changes: Vec<ItemChange>,
    ) -> Result<TimelineItem> {
        let mut tx = self.pool.inner().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE timeline_items
            SET title = $2, description = $3, item_type = $4, start_time = $5, end_time = $6,
                duration_minutes = $7, buffer_minutes = $8, status = $9,
                actual_start_time = $10, actual_end_time = $11, order_index = $12,
                is_critical = $13, is_flexible = $14, requirements = $15, notes = $16,
                location = $17, assigned_to = $18, task_id = $19, updated_at = $20
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.item_type.as_str())
        .bind(item.start_time)
        .bind(item.end_time)
        .bind(item.duration_minutes)
        .bind(item.buffer_minutes)
        .bind(item.status.as_str())
        .bind(item.actual_start_time)
        .bind(item.actual_end_time)
        .bind(item.order_index)
        .bind(item.is_critical)
        .bind(item.is_flexible)
        .bind(to_json(&item.requirements)?)
        .bind(&item.notes)
        .bind(&item.location)
        .bind(item.assigned_to)
        .bind(item.task_id)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(PlannerError::not_found(format!("item {} not found", item.id)));
        }

        for change in &changes {
            sqlx::query(
                r#"
                INSERT INTO timeline_item_changes (
                    id, item_id, changed_by, change_kind, old_value, new_value, reason, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(change.id)
            .bind(change.item_id)
            .bind(change.changed_by)
            .bind(change.kind.as_str())
            .bind(&change.old_value)
            .bind(&change.new_value)
            .bind(&change.reason)
            .bind(change.created_at)
            .execute(&mut *tx)
            .await?;
        }

        Self::recompute_duration(&mut tx, item.timeline_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn delete_item(&self, item_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.inner().begin().await?;
        let timeline_id: Option<Uuid> =
            sqlx::query_scalar("SELECT timeline_id FROM timeline_items WHERE id = $1 FOR UPDATE")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(timeline_id) = timeline_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM timeline_dependencies WHERE item_id = $1 OR depends_on_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM timeline_item_changes WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM timeline_items WHERE id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        Self::recompute_duration(&mut tx, timeline_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn reorder_items(&self, timeline_id: Uuid, orders: &[ItemOrder]) -> Result<bool> {
        let mut tx = self.pool.inner().begin().await?;
        let owned: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM timeline_items WHERE timeline_id = $1 FOR UPDATE")
                .bind(timeline_id)
                .fetch_all(&mut *tx)
                .await?;
        let owned: HashSet<Uuid> = owned.into_iter().collect();
        if !orders_are_consistent(orders, &owned) {
            tx.rollback().await?;
            return Ok(false);
        }

        for order in orders {
            let applied = sqlx::query(
                "UPDATE timeline_items SET order_index = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(order.item_id)
            .bind(order.order_index)
            .execute(&mut *tx)
            .await;
            if let Err(err) = applied {
                warn!(%timeline_id, item_id = %order.item_id, error = %err, "reorder failed, rolling back");
                tx.rollback().await?;
                return Ok(false);
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn insert_dependency(&self, dependency: Dependency) -> Result<Dependency> {
        sqlx::query(
            r#"
            INSERT INTO timeline_dependencies (
                id, item_id, depends_on_id, dependency_type, lag_minutes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(dependency.id)
        .bind(dependency.item_id)
        .bind(dependency.depends_on_id)
        .bind(dependency.dependency_type.as_str())
        .bind(dependency.lag_minutes)
        .bind(dependency.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(dependency)
    }

    async fn get_dependency(&self, dependency_id: Uuid) -> Result<Option<Dependency>> {
        let row = sqlx::query_as::<_, DependencyRow>(
            "SELECT id, item_id, depends_on_id, dependency_type, lag_minutes, created_at \
             FROM timeline_dependencies WHERE id = $1",
        )
        .bind(dependency_id)
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_dependencies(&self, timeline_id: Uuid) -> Result<Vec<Dependency>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            r#"
            SELECT d.id, d.item_id, d.depends_on_id, d.dependency_type, d.lag_minutes, d.created_at
            FROM timeline_dependencies d
            JOIN timeline_items i ON i.id = d.item_id
            WHERE i.timeline_id = $1
            ORDER BY d.created_at
            "#,
        )
        .bind(timeline_id)
        .fetch_all(self.pool.inner())
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_dependency(&self, dependency_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM timeline_dependencies WHERE id = $1")
            .bind(dependency_id)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_template(&self, template: Template) -> Result<Template> {
        let sql = format!(
            r#"
            INSERT INTO timeline_templates (
                id, name, description, event_type, is_public, is_verified, usage_count,
                default_duration_hours, setup_time_minutes, cleanup_time_minutes,
                template_data, creator_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let data = serde_json::to_value(&template.template_data)
            .map_err(|err| PlannerError::Serialization(err.to_string()))?;
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(template.id)
            .bind(&template.name)
            .bind(&template.description)
            .bind(&template.event_type)
            .bind(template.is_public)
            .bind(template.is_verified)
            .bind(template.usage_count)
            .bind(template.default_duration_hours)
            .bind(template.setup_time_minutes)
            .bind(template.cleanup_time_minutes)
            .bind(data)
            .bind(template.creator_id)
            .bind(template.created_at)
            .bind(template.updated_at)
            .fetch_one(self.pool.inner())
            .await?;
        row.try_into()
    }

    async fn get_template(&self, template_id: Uuid) -> Result<Option<Template>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM timeline_templates WHERE id = $1");
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(template_id)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_templates(
        &self,
        viewer: Uuid,
        filter: &TemplateFilter,
    ) -> Result<Page<Template>> {
        let (page, per_page) = filter.page_bounds();

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM timeline_templates");
        Self::push_template_filters(&mut count, viewer, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.inner())
            .await?;

        let mut builder =
            QueryBuilder::new(format!("SELECT {TEMPLATE_COLUMNS} FROM timeline_templates"));
        Self::push_template_filters(&mut builder, viewer, filter);
        builder.push(" ORDER BY usage_count DESC, name LIMIT ");
        builder.push_bind(i64::from(per_page));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(page - 1) * i64::from(per_page));

        let rows = builder
            .build_query_as::<TemplateRow>()
            .fetch_all(self.pool.inner())
            .await?;
        let items = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<Template>>>()?;
        Ok(Page::new(items, total.max(0) as u64, page, per_page))
    }

    async fn instantiate(
        &self,
        mut timeline: Timeline,
        items: Vec<TimelineItem>,
        template_id: Option<Uuid>,
    ) -> Result<Timeline> {
        let mut tx = self.pool.inner().begin().await?;
        if let Some(template_id) = template_id {
            let bumped: Option<Uuid> = sqlx::query_scalar(
                "UPDATE timeline_templates SET usage_count = usage_count + 1, updated_at = NOW() \
                 WHERE id = $1 RETURNING id",
            )
            .bind(template_id)
            .fetch_optional(&mut *tx)
            .await?;
            if bumped.is_none() {
                return Err(PlannerError::not_found(format!(
                    "template {template_id} not found"
                )));
            }
        }

        timeline.total_duration_minutes = total_duration(&items)?;
        let stored = Self::insert_timeline_tx(&mut tx, &timeline).await?;
        for item in &items {
            Self::insert_item_tx(&mut tx, item).await?;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_changes(&self, item_id: Uuid) -> Result<Vec<ItemChange>> {
        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT id, item_id, changed_by, change_kind, old_value, new_value, reason, created_at
            FROM timeline_item_changes
            WHERE item_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(item_id)
        .fetch_all(self.pool.inner())
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Event lookups against the events service's tables.
#[derive(Clone)]
pub struct PgEventDirectory {
    pool: DatabasePool,
}

impl PgEventDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventAccess for PgEventDirectory {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<EventRecord>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, event_type, creator_id, start_datetime, end_datetime \
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(self.pool.inner())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let collaborators: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM event_collaborators WHERE event_id = $1")
                .bind(event_id)
                .fetch_all(self.pool.inner())
                .await?;
        let invitees: Vec<Uuid> =
            sqlx::query_scalar("SELECT invitee_id FROM event_invitations WHERE event_id = $1")
                .bind(event_id)
                .fetch_all(self.pool.inner())
                .await?;

        Ok(Some(EventRecord {
            id: row.id,
            title: row.title,
            event_type: row.event_type,
            creator_id: row.creator_id,
            start_datetime: row.start_datetime,
            end_datetime: row.end_datetime,
            collaborators,
            invitees,
        }))
    }

    async fn readable_events(&self, user_id: Uuid, event_type: Option<&str>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT e.id FROM events e
            WHERE (
                e.creator_id = $1
                OR EXISTS (SELECT 1 FROM event_collaborators c WHERE c.event_id = e.id AND c.user_id = $1)
                OR EXISTS (SELECT 1 FROM event_invitations i WHERE i.event_id = e.id AND i.invitee_id = $1)
            )
            AND ($2::TEXT IS NULL OR e.event_type = $2)
            "#,
        )
        .bind(user_id)
        .bind(event_type)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(ids)
    }
}

/// `ILIKE` pattern matching `text` anywhere, with wildcards in `text` escaped.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    event_type: Option<String>,
    creator_id: Uuid,
    start_datetime: NaiveDateTime,
    end_datetime: Option<NaiveDateTime>,
}

#[derive(FromRow)]
struct TimelineRow {
    id: Uuid,
    event_id: Uuid,
    creator_id: Uuid,
    template_id: Option<Uuid>,
    title: String,
    description: Option<String>,
    is_active: bool,
    is_template: bool,
    auto_generated: bool,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    total_duration_minutes: i32,
    default_buffer_minutes: i32,
    setup_buffer_minutes: i32,
    cleanup_buffer_minutes: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TimelineRow> for Timeline {
    fn from(row: TimelineRow) -> Self {
        Timeline {
            id: row.id,
            event_id: row.event_id,
            creator_id: row.creator_id,
            template_id: row.template_id,
            title: row.title,
            description: row.description,
            is_active: row.is_active,
            is_template: row.is_template,
            auto_generated: row.auto_generated,
            start_time: row.start_time,
            end_time: row.end_time,
            total_duration_minutes: row.total_duration_minutes,
            default_buffer_minutes: row.default_buffer_minutes,
            setup_buffer_minutes: row.setup_buffer_minutes,
            cleanup_buffer_minutes: row.cleanup_buffer_minutes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    timeline_id: Uuid,
    title: String,
    description: Option<String>,
    item_type: String,
    start_time: NaiveTime,
    end_time: Option<NaiveTime>,
    duration_minutes: i32,
    buffer_minutes: i32,
    status: String,
    actual_start_time: Option<NaiveTime>,
    actual_end_time: Option<NaiveTime>,
    order_index: i32,
    is_critical: bool,
    is_flexible: bool,
    requirements: Option<String>,
    notes: Option<String>,
    location: Option<String>,
    assigned_to: Option<Uuid>,
    task_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for TimelineItem {
    type Error = PlannerError;

    fn try_from(row: ItemRow) -> Result<Self> {
        let requirements = match row.requirements.as_deref() {
            Some(raw) if !raw.trim().is_empty() => from_json_str(raw)?,
            _ => Vec::new(),
        };
        Ok(TimelineItem {
            id: row.id,
            timeline_id: row.timeline_id,
            title: row.title,
            description: row.description,
            item_type: row.item_type.parse()?,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_minutes: row.duration_minutes,
            buffer_minutes: row.buffer_minutes,
            status: row.status.parse()?,
            order_index: row.order_index,
            is_critical: row.is_critical,
            is_flexible: row.is_flexible,
            requirements,
            notes: row.notes,
            location: row.location,
            assigned_to: row.assigned_to,
            task_id: row.task_id,
            actual_start_time: row.actual_start_time,
            actual_end_time: row.actual_end_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DependencyRow {
    id: Uuid,
    item_id: Uuid,
    depends_on_id: Uuid,
    dependency_type: String,
    lag_minutes: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<DependencyRow> for Dependency {
    type Error = PlannerError;

    fn try_from(row: DependencyRow) -> Result<Self> {
        Ok(Dependency {
            id: row.id,
            item_id: row.item_id,
            depends_on_id: row.depends_on_id,
            dependency_type: row.dependency_type.parse()?,
            lag_minutes: row.lag_minutes,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    event_type: String,
    is_public: bool,
    is_verified: bool,
    usage_count: i32,
    default_duration_hours: i32,
    setup_time_minutes: i32,
    cleanup_time_minutes: i32,
    template_data: Value,
    creator_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = PlannerError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        let template_data: TemplateData = serde_json::from_value(row.template_data)?;
        Ok(Template {
            id: row.id,
            name: row.name,
            description: row.description,
            event_type: row.event_type,
            is_public: row.is_public,
            is_verified: row.is_verified,
            usage_count: row.usage_count,
            default_duration_hours: row.default_duration_hours,
            setup_time_minutes: row.setup_time_minutes,
            cleanup_time_minutes: row.cleanup_time_minutes,
            template_data,
            creator_id: row.creator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ChangeRow {
    id: Uuid,
    item_id: Uuid,
    changed_by: Uuid,
    change_kind: String,
    old_value: Option<String>,
    new_value: Option<String>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChangeRow> for ItemChange {
    type Error = PlannerError;

    fn try_from(row: ChangeRow) -> Result<Self> {
        Ok(ItemChange {
            id: row.id,
            item_id: row.item_id,
            changed_by: row.changed_by,
            kind: row.change_kind.parse()?,
            old_value: row.old_value,
            new_value: row.new_value,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}
