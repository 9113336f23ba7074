/*
 * 5D Labs DevsArena - Lab Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Lab Controller Service - HTTP front door for lab lifecycle requests
//!
//! This service:
//! - Starts labs (playground and quest) by provisioning their Kubernetes resources
//! - Ends and deletes labs, including their persisted workspace content
//! - Enforces the concurrent lab cap against the shared Redis lab state
//! - Provides health and readiness endpoints

use anyhow::Context as _;
use lab_controller::lab::{
    DisabledQuestCatalog, HttpQuestCatalog, KubeCluster, QuestCatalog, ResourceTemplates,
};
use lab_controller::{router, AppState, ControllerConfig, LabOrchestrator};
use lab_state::store::redis_store::ENV_REDIS_URI;
use lab_state::RedisLabStore;
use lab_storage::{S3ObjectStore, S3Settings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        "Starting DevsArena Lab Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_controller_config().with_env_overrides();
    config.validate().context("Invalid controller configuration")?;
    let config = Arc::new(config);
    info!(
        namespace = %config.namespace,
        max_concurrent_labs = config.max_concurrent_labs,
        bucket = %config.storage.bucket,
        "Configuration loaded"
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let redis_uri = std::env::var(ENV_REDIS_URI)
        .with_context(|| format!("{ENV_REDIS_URI} must be set"))?;
    let store = Arc::new(RedisLabStore::connect(&redis_uri).await?);

    let objects =
        Arc::new(S3ObjectStore::connect(S3Settings::for_bucket(&config.storage.bucket)).await?);

    let catalog: Arc<dyn QuestCatalog> = match &config.catalog.base_url {
        Some(url) => {
            info!("Quest catalog at {}", url);
            Arc::new(HttpQuestCatalog::new(url.as_str()))
        }
        None => {
            warn!("No quest catalog configured; quest starts will fail");
            Arc::new(DisabledQuestCatalog)
        }
    };

    let templates = Arc::new(ResourceTemplates::new(config.as_ref().clone(), redis_uri)?);

    let orchestrator = Arc::new(LabOrchestrator::new(
        Arc::new(KubeCluster::new(client)),
        store,
        objects,
        catalog,
        templates,
        config.clone(),
    ));
    orchestrator.admission().initialize().await?;
    info!("✅ Lab state store initialized");

    let state = AppState { orchestrator };

    // Build the HTTP router
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_seconds,
            ))),
    );

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(
        "Lab controller HTTP server listening on {}",
        config.server.bind_address
    );

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Lab controller stopped");
    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,lab_controller=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_controller_config() -> ControllerConfig {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or("/config/config.yaml");

    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
