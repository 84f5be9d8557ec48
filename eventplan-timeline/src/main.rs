use std::sync::Arc;

use eventplan_core::config::CoreConfig;
use eventplan_core::errors::PlannerError;
use eventplan_core::logging;
use eventplan_core::SystemClock;
use eventplan_timeline::generation::{FallbackGenerator, HttpTimelineGenerator, TimelineGenerator};
use eventplan_timeline::repository::{PgEventDirectory, PgTimelineStore};
use eventplan_timeline::{TimelineApiBuilder, TimelineService, TimelineServiceConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    if let Err(err) = logging::init_tracing(None) {
        eprintln!("failed to initialise tracing: {err}");
    }

    let core = load_timeline_config()?;
    let mut config = TimelineServiceConfig::from_env().map_err(PlannerError::from)?;
    if let Some(bind) = core.http_bind.clone() {
        config.bind_address = bind;
    }
    config.utc_offset_minutes = core.utc_offset_minutes;

    let store = PgTimelineStore::from_config(&core).await?;
    let events = PgEventDirectory::new(store.pool().clone());

    let generator: Arc<dyn TimelineGenerator> = match config.generator_url.as_deref() {
        Some(url) => Arc::new(HttpTimelineGenerator::new(url).map_err(PlannerError::from)?),
        None => {
            warn!("no generator url configured, using the built-in schedule");
            Arc::new(FallbackGenerator)
        }
    };

    let service = TimelineService::new(Arc::new(store), Arc::new(events))
        .with_generator(generator)
        .with_clock(Arc::new(SystemClock::with_offset_minutes(
            config.utc_offset_minutes,
        )))
        .with_generation_timeout(config.generation_timeout())
        .with_fallback(config.fallback_enabled);

    let shutdown = TimelineApiBuilder::new(service)
        .serve(&config)
        .await
        .map_err(ServerError::Server)?;
    info!(service = %core.service_name, bind = %config.bind_address, "timeline service ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down timeline service");
    let _ = shutdown.send(());
    Ok(())
}

fn load_timeline_config() -> Result<CoreConfig, PlannerError> {
    CoreConfig::from_env_with_prefix("TIMELINE_")
        .or_else(|_| CoreConfig::from_env())
        .map_err(Into::into)
}

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("failed to wait for shutdown signal: {0}")]
    Io(#[from] std::io::Error),
    #[error("startup failed: {0}")]
    Startup(#[from] PlannerError),
    #[error("http server error: {0}")]
    Server(anyhow::Error),
}
