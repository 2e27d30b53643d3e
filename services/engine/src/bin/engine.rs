//! services/engine/src/bin/engine.rs

use engine_lib::{
    adapters::{JsonFileStorage, LogPresenter, PgDoseStore, SystemClock},
    agent::{AgentDeps, DeliveryAgent},
    config::Config,
    error::EngineError,
    foreground::{EngineContext, ForegroundRuntime},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(
        lead = config.window_policy.lead_minutes(),
        tolerance = config.window_policy.tolerance_minutes(),
        "Configuration loaded. Starting dose reminder engine..."
    );

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgDoseStore::new(db_pool));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Adapters ---
    let clock = Arc::new(SystemClock);
    let local = Arc::new(JsonFileStorage::new(config.local_storage_path.clone()));
    info!(path = %local.path().display(), "Using local state file.");

    // --- 4. Start the Delivery Agent ---
    let (agent, agent_task) = DeliveryAgent::spawn(AgentDeps {
        presenter: Arc::new(LogPresenter),
        store: store.clone(),
        clock: clock.clone(),
        snooze_minutes: config.snooze_minutes,
    });

    // --- 5. Start the Foreground Runtime ---
    let ctx = EngineContext {
        store,
        local,
        clock,
        agent: agent.clone(),
        config: config.clone(),
    };
    let runtime = ForegroundRuntime::start(ctx, config.user_id).await;
    info!(user_id = %runtime.user_id(), "Engine running. Press Ctrl-C to stop.");

    // --- 6. Run Until Interrupted ---
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    runtime.stop().await;
    agent.shutdown().await;
    agent_task.await.map_err(|e| {
        error!("Delivery agent ended abnormally: {}", e);
        EngineError::Internal(format!("delivery agent task failed: {}", e))
    })?;
    info!("Engine stopped.");
    Ok(())
}
