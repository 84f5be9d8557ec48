use async_trait::async_trait;
use eventplan_core::errors::{PlannerError, Result};
use eventplan_core::serde_utils::from_json_bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::access::EventRecord;
use crate::model::{ItemBlueprint, ItemType};
use crate::requests::GenerateTimeline;

pub const DEFAULT_EVENT_TYPE: &str = "general";
pub const DEFAULT_DURATION_HOURS: u32 = 4;
pub const DEFAULT_GUEST_COUNT: u32 = 20;
/// Generated timelines cover at most one day.
pub const MAX_DURATION_HOURS: u32 = 24;

/// Parameters handed to a generator once defaults are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub event_type: String,
    pub duration_hours: u32,
    pub guest_count: u32,
    pub preferences: Vec<String>,
}

impl GenerationRequest {
    /// Fills unset values from the event, then from the built-in defaults.
    pub fn resolve(request: GenerateTimeline, event: &EventRecord) -> Result<Self> {
        let duration_hours = request.duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
        check_duration_hours(duration_hours)?;
        Ok(Self {
            event_type: request
                .event_type
                .or_else(|| event.event_type.clone())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            duration_hours,
            guest_count: request.guest_count.unwrap_or(DEFAULT_GUEST_COUNT),
            preferences: request.preferences,
        })
    }
}

fn check_duration_hours(hours: u32) -> Result<()> {
    if hours > MAX_DURATION_HOURS {
        return Err(PlannerError::invalid(format!(
            "duration_hours must not exceed {MAX_DURATION_HOURS}, got {hours}"
        )));
    }
    Ok(())
}

/// Source of proposed timeline items for an event.
#[async_trait]
pub trait TimelineGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<ItemBlueprint>>;
}

/// Built-in schedule: setup, guest arrival, main program, cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    pub fn schedule(request: &GenerationRequest) -> Result<Vec<ItemBlueprint>> {
        check_duration_hours(request.duration_hours)?;
        let total = (i64::from(request.duration_hours) * 60).max(180);
        let step = |title: &str, item_type: ItemType, offset: i64, minutes: i64| -> Result<ItemBlueprint> {
            let duration_minutes = i32::try_from(minutes).map_err(|_| {
                PlannerError::invalid(format!("'{title}' would last {minutes} minutes"))
            })?;
            Ok(ItemBlueprint {
                title: title.to_string(),
                description: None,
                item_type,
                start_time_offset_minutes: offset,
                duration_minutes,
            })
        };

        Ok(vec![
            step("Venue setup and decorations", ItemType::Setup, 0, 60)?,
            step("Guest arrival", ItemType::Arrival, 60, 30)?,
            step(
                &format!("Main {} program", request.event_type),
                ItemType::Activity,
                90,
                total - 120,
            )?,
            step("Event cleanup", ItemType::Cleanup, total - 30, 30)?,
        ])
    }
}

#[async_trait]
impl TimelineGenerator for FallbackGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<ItemBlueprint>> {
        Self::schedule(request)
    }
}

/// HTTP client for the external suggestion service.
#[derive(Clone)]
pub struct HttpTimelineGenerator {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTimelineGenerator {
    pub fn new(base_url: &str) -> std::result::Result<Self, GenerationClientError> {
        let mut url = Url::parse(base_url).map_err(|err| GenerationClientError::InvalidUrl {
            url: base_url.to_string(),
            source: err,
        })?;

        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_string();
            path.push('/');
            url.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn request_items(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Vec<ItemBlueprint>, GenerationClientError> {
        let url = self
            .base_url
            .join("timelines/generate")
            .map_err(|err| GenerationClientError::InvalidUrl {
                url: format!("{}timelines/generate", self.base_url),
                source: err,
            })?;

        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|err| GenerationClientError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationClientError::UnexpectedStatus {
                status: response.status(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| GenerationClientError::Http(err.to_string()))?;
        let payload: GenerationResponse =
            from_json_bytes(&body).map_err(|err| GenerationClientError::Decode(err.to_string()))?;

        Ok(payload.items)
    }
}

#[async_trait]
impl TimelineGenerator for HttpTimelineGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<ItemBlueprint>> {
        Ok(self.request_items(request).await?)
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    items: Vec<ItemBlueprint>,
}

#[derive(Debug, Error)]
pub enum GenerationClientError {
    #[error("invalid generator url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("generator HTTP request failed: {0}")]
    Http(String),
    #[error("generator returned unexpected status {status}")]
    UnexpectedStatus { status: reqwest::StatusCode },
    #[error("failed to decode generator response: {0}")]
    Decode(String),
}

impl From<GenerationClientError> for PlannerError {
    fn from(err: GenerationClientError) -> Self {
        PlannerError::Generation(err.to_string())
    }
}
