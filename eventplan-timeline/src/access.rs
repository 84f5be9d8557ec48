use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use eventplan_core::errors::{PlannerError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Timeline;

/// Read-only view of an event owned by the events service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub event_type: Option<String>,
    pub creator_id: Uuid,
    pub start_datetime: NaiveDateTime,
    #[serde(default)]
    pub end_datetime: Option<NaiveDateTime>,
    #[serde(default)]
    pub collaborators: Vec<Uuid>,
    #[serde(default)]
    pub invitees: Vec<Uuid>,
}

impl EventRecord {
    pub fn new(
        title: impl Into<String>,
        creator_id: Uuid,
        start_datetime: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            event_type: None,
            creator_id,
            start_datetime,
            end_datetime: None,
            collaborators: Vec::new(),
            invitees: Vec::new(),
        }
    }

    /// Creator, collaborators and invitees may read.
    pub fn can_read(&self, user_id: Uuid) -> bool {
        self.can_edit(user_id) || self.invitees.contains(&user_id)
    }

    /// Creator and collaborators may edit.
    pub fn can_edit(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id || self.collaborators.contains(&user_id)
    }
}

/// Timeline edits are reserved to the timeline's creator and the event's creator.
pub fn can_edit_timeline(timeline: &Timeline, event: &EventRecord, user_id: Uuid) -> bool {
    timeline.creator_id == user_id || event.creator_id == user_id
}

/// Lookup of events together with the caller's access to them.
#[async_trait]
pub trait EventAccess: Send + Sync {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<EventRecord>>;

    /// Ids of the events `user_id` may read, optionally limited to one event type.
    async fn readable_events(&self, user_id: Uuid, event_type: Option<&str>) -> Result<Vec<Uuid>>;

    /// Returns the event when `user_id` may read it.
    async fn get_event_with_access(&self, event_id: Uuid, user_id: Uuid) -> Result<EventRecord> {
        let event = self
            .find_event(event_id)
            .await?
            .ok_or_else(|| PlannerError::not_found(format!("event {event_id} not found")))?;
        if !event.can_read(user_id) {
            return Err(PlannerError::unauthorized(format!(
                "no access to event {event_id}"
            )));
        }
        Ok(event)
    }

    /// Returns the event when `user_id` may edit it.
    async fn get_event_for_edit(&self, event_id: Uuid, user_id: Uuid) -> Result<EventRecord> {
        let event = self.get_event_with_access(event_id, user_id).await?;
        if !event.can_edit(user_id) {
            return Err(PlannerError::unauthorized(format!(
                "no edit access to event {event_id}"
            )));
        }
        Ok(event)
    }
}

/// In-memory event directory used by tests and offline tooling.
#[derive(Default, Clone)]
pub struct InMemoryEventDirectory {
    inner: Arc<RwLock<HashMap<Uuid, EventRecord>>>,
}

impl InMemoryEventDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: EventRecord) {
        self.inner.write().insert(event.id, event);
    }

    pub fn remove(&self, event_id: Uuid) -> Option<EventRecord> {
        self.inner.write().remove(&event_id)
    }
}

#[async_trait]
impl EventAccess for InMemoryEventDirectory {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<EventRecord>> {
        Ok(self.inner.read().get(&event_id).cloned())
    }

    async fn readable_events(&self, user_id: Uuid, event_type: Option<&str>) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .values()
            .filter(|event| event.can_read(user_id))
            .filter(|event| event_type.map_or(true, |kind| event.event_type.as_deref() == Some(kind)))
            .map(|event| event.id)
            .collect())
    }
}
