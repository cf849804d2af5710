use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_service::api::{self, HttpListener};
use catalog_service::background::{start_expiration_cleaner, TaskSupervisor};
use catalog_service::mailer::TracingMailer;
use catalog_service::shutdown::{shutdown_signal, ShutdownCoordinator};
use catalog_service::{config::Config, storage::Database, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "catalog-service starting");

    let config = Config::load()?;
    info!(
        instance_id = %config.node.instance_id,
        environment = %config.node.environment,
        "Loaded configuration"
    );

    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    let tasks = TaskSupervisor::new();
    let coordinator = ShutdownCoordinator::new(config.server.shutdown_grace());

    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        tasks.clone(),
        Arc::new(TracingMailer),
        coordinator.status(),
    ));

    let cleaner_handle = start_expiration_cleaner(Arc::clone(&state));

    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    let result = coordinator
        .run(shutdown_signal(), HttpListener::new(listener, app), &tasks)
        .await;

    cleaner_handle.abort();

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Shutdown finished with an error");
            Err(e.into())
        }
    }
}
