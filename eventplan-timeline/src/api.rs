use std::env;
use std::time::Duration;

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use eventplan_core::errors::{ConfigError, PlannerError};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::requests::{
    CreateTimeline, GenerateTimeline, ItemOrder, ItemUpdate, NewDependency, NewTemplate,
    NewTimelineItem, StatusUpdate, TemplateFilter, TimelineFilter, TimelineSearch, TimelineUpdate,
};
use crate::service::TimelineService;

pub const USER_HEADER: &str = "x-user-id";

/// Configuration for the timeline API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineServiceConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub generator_url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_fallback")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_bind_address() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_fallback() -> bool {
    true
}

impl Default for TimelineServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            generator_url: None,
            generation_timeout_secs: default_generation_timeout_secs(),
            fallback_enabled: default_fallback(),
            utc_offset_minutes: 0,
        }
    }
}

impl TimelineServiceConfig {
    /// Reads `TIMELINE_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(bind) = env::var("TIMELINE_HTTP_BIND") {
            config.bind_address = bind;
        }
        config.generator_url = env::var("TIMELINE_GENERATOR_URL").ok();
        if let Ok(raw) = env::var("TIMELINE_GENERATION_TIMEOUT_SECS") {
            config.generation_timeout_secs =
                raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
                    key: "TIMELINE_GENERATION_TIMEOUT_SECS".into(),
                    value: raw.clone(),
                })?;
        }
        if let Ok(raw) = env::var("TIMELINE_GENERATION_FALLBACK") {
            config.fallback_enabled = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        key: "TIMELINE_GENERATION_FALLBACK".into(),
                        value: raw,
                    })
                }
            };
        }
        Ok(config)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new<M: Into<String>>(status: StatusCode, message: M) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<PlannerError> for AppError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::NotFound(message) => AppError::new(StatusCode::NOT_FOUND, message),
            PlannerError::Authorization(message) => AppError::new(StatusCode::FORBIDDEN, message),
            PlannerError::Validation(message) | PlannerError::Deserialization(message) => {
                AppError::new(StatusCode::BAD_REQUEST, message)
            }
            other => {
                error!(error = %other, "timeline request failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

type AppResult<T> = Result<T, AppError>;

/// Caller identity forwarded by the authenticating proxy.
#[derive(Debug, Clone, Copy)]
pub struct RequestUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for RequestUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "missing x-user-id header"))?;
        Uuid::parse_str(raw.trim())
            .map(RequestUser)
            .map_err(|_| AppError::new(StatusCode::UNAUTHORIZED, "invalid x-user-id header"))
    }
}

#[derive(Clone)]
struct TimelineApiState {
    service: TimelineService,
}

/// Helper used by the binary and tests to compose the REST API router.
#[derive(Clone)]
pub struct TimelineApiBuilder {
    state: TimelineApiState,
}

impl TimelineApiBuilder {
    pub fn new(service: TimelineService) -> Self {
        Self {
            state: TimelineApiState { service },
        }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route(
                "/v1/events/:event_id/timelines",
                get(list_event_timelines).post(create_timeline),
            )
            .route(
                "/v1/events/:event_id/timelines/generate",
                post(generate_timeline),
            )
            .route(
                "/v1/events/:event_id/timelines/from-template/:template_id",
                post(apply_template),
            )
            .route("/v1/timelines/search", get(search_timelines))
            .route("/v1/users/me/timelines", get(list_user_timelines))
            .route(
                "/v1/timelines/:timeline_id",
                get(get_timeline)
                    .patch(update_timeline)
                    .delete(delete_timeline),
            )
            .route("/v1/timelines/:timeline_id/items", post(add_item))
            .route("/v1/timelines/:timeline_id/items/bulk", post(bulk_add_items))
            .route("/v1/timelines/:timeline_id/items/order", post(reorder_items))
            .route(
                "/v1/timelines/:timeline_id/dependencies",
                get(list_dependencies).post(add_dependency),
            )
            .route(
                "/v1/timelines/:timeline_id/dependencies/violations",
                get(dependency_violations),
            )
            .route("/v1/timelines/:timeline_id/validate", get(validate_timeline))
            .route("/v1/timelines/:timeline_id/conflicts", get(find_conflicts))
            .route("/v1/timelines/:timeline_id/statistics", get(statistics))
            .route("/v1/timelines/:timeline_id/progress", get(progress))
            .route("/v1/timelines/:timeline_id/overdue", get(overdue))
            .route("/v1/timelines/:timeline_id/upcoming", get(upcoming))
            .route(
                "/v1/timeline-items/:item_id",
                patch(update_item).delete(delete_item),
            )
            .route("/v1/timeline-items/:item_id/status", post(update_item_status))
            .route("/v1/timeline-items/:item_id/history", get(item_history))
            .route(
                "/v1/timeline-dependencies/:dependency_id",
                axum::routing::delete(remove_dependency),
            )
            .route(
                "/v1/timeline-templates",
                get(list_templates).post(create_template),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }

    /// Spawns an HTTP server binding to the configured address.
    pub async fn serve(
        self,
        config: &TimelineServiceConfig,
    ) -> anyhow::Result<oneshot::Sender<()>> {
        let (tx, rx) = oneshot::channel();
        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        let address = listener.local_addr()?;
        let app = self.into_router();

        tokio::spawn(async move {
            info!(%address, "starting timeline service");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .ok();
        });

        Ok(tx)
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn success(value: bool) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": value }))
}

async fn create_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<CreateTimeline>,
) -> AppResult<impl IntoResponse> {
    let timeline = state.service.create_timeline(event_id, user, payload).await?;
    Ok((StatusCode::CREATED, Json(timeline)))
}

async fn list_event_timelines(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(event_id): Path<Uuid>,
    Query(filter): Query<TimelineFilter>,
) -> AppResult<impl IntoResponse> {
    let page = state
        .service
        .list_event_timelines(event_id, user, filter)
        .await?;
    Ok(Json(page))
}

async fn search_timelines(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Query(search): Query<TimelineSearch>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.search_timelines(user, search).await?))
}

async fn list_user_timelines(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Query(search): Query<TimelineSearch>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.list_user_timelines(user, search).await?))
}

async fn generate_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<GenerateTimeline>,
) -> AppResult<impl IntoResponse> {
    let timeline = state
        .service
        .generate_ai_timeline(event_id, user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(timeline)))
}

async fn apply_template(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path((event_id, template_id)): Path<(Uuid, Uuid)>,
) -> AppResult<impl IntoResponse> {
    let timeline = state
        .service
        .apply_template(event_id, user, template_id)
        .await?;
    Ok((StatusCode::CREATED, Json(timeline)))
}

async fn get_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.get_timeline(timeline_id, user).await?))
}

async fn update_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Json(payload): Json<TimelineUpdate>,
) -> AppResult<impl IntoResponse> {
    let timeline = state
        .service
        .update_timeline(timeline_id, user, payload)
        .await?;
    Ok(Json(timeline))
}

async fn delete_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let deleted = state.service.delete_timeline(timeline_id, user).await?;
    Ok(success(deleted))
}

async fn add_item(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Json(payload): Json<NewTimelineItem>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .service
        .add_timeline_item(timeline_id, user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn bulk_add_items(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Json(payload): Json<Vec<NewTimelineItem>>,
) -> AppResult<impl IntoResponse> {
    let items = state
        .service
        .bulk_add_items(timeline_id, user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(items)))
}

async fn reorder_items(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Json(payload): Json<Vec<ItemOrder>>,
) -> AppResult<impl IntoResponse> {
    let applied = state
        .service
        .reorder_timeline_items(timeline_id, user, payload)
        .await?;
    Ok(success(applied))
}

async fn list_dependencies(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state.service.list_dependencies(timeline_id, user).await?,
    ))
}

async fn add_dependency(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Json(payload): Json<NewDependency>,
) -> AppResult<impl IntoResponse> {
    let dependency = state
        .service
        .add_item_dependency(timeline_id, user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(dependency)))
}

async fn dependency_violations(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state.service.check_dependencies(timeline_id, user).await?,
    ))
}

async fn remove_dependency(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(dependency_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let removed = state
        .service
        .remove_item_dependency(dependency_id, user)
        .await?;
    Ok(success(removed))
}

async fn validate_timeline(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state.service.validate_timeline(timeline_id, user).await?,
    ))
}

async fn find_conflicts(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.find_conflicts(timeline_id, user).await?))
}

async fn statistics(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state
            .service
            .get_timeline_statistics(timeline_id, user)
            .await?,
    ))
}

async fn progress(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state.service.get_timeline_progress(timeline_id, user).await?,
    ))
}

async fn overdue(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state.service.get_overdue_items(timeline_id, user).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct UpcomingQuery {
    #[serde(default)]
    within_minutes: Option<i64>,
}

async fn upcoming(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(timeline_id): Path<Uuid>,
    Query(query): Query<UpcomingQuery>,
) -> AppResult<impl IntoResponse> {
    let items = state
        .service
        .get_upcoming_items(timeline_id, user, query.within_minutes)
        .await?;
    Ok(Json(items))
}

async fn update_item(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<ItemUpdate>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .service
        .update_timeline_item(item_id, user, payload)
        .await?;
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let deleted = state.service.delete_timeline_item(item_id, user).await?;
    Ok(success(deleted))
}

async fn update_item_status(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .service
        .update_item_status(item_id, user, payload)
        .await?;
    Ok(Json(item))
}

async fn item_history(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.get_item_history(item_id, user).await?))
}

async fn list_templates(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Query(filter): Query<TemplateFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.list_templates(user, filter).await?))
}

async fn create_template(
    State(state): State<TimelineApiState>,
    RequestUser(user): RequestUser,
    Json(payload): Json<NewTemplate>,
) -> AppResult<impl IntoResponse> {
    let template = state.service.create_template(user, payload).await?;
    Ok((StatusCode::CREATED, Json(template)))
}
