mod agent;
mod config;
mod db;
mod errors;
mod models;
mod routes;
mod service;
mod state;
mod storage;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::agent::{CompletionProvider, OpenAiCompletionClient};
use crate::config::AppConfig;
use crate::db::{ChatStore, ConversationRepository, InMemoryChatStore};
use crate::service::chat_service::ChatService;
use crate::service::connection_manager::ConnectionManager;
use crate::service::turn_processor::{TurnProcessor, TurnSettings};
use crate::state::AppState;
use crate::storage::{CloudinaryImageStore, DisabledImageStore, ImageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Chat store ────────────────────────────────────────────────────────────
    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            info!("Database connection established and migrations applied");
            Arc::new(ConversationRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; conversations are kept in memory only");
            Arc::new(InMemoryChatStore::new())
        }
    };

    // ── Image storage ─────────────────────────────────────────────────────────
    let images: Arc<dyn ImageStore> = match config.cloudinary.clone() {
        Some(cloudinary) => {
            Arc::new(CloudinaryImageStore::new(cloudinary, config.stream_idle_timeout)?)
        }
        None => {
            warn!("Cloudinary credentials not set; image uploads are disabled");
            Arc::new(DisabledImageStore)
        }
    };

    // ── Completion provider ───────────────────────────────────────────────────
    let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiCompletionClient::new(
        &config.openai_api_key,
        config.openai_base_url.as_deref(),
        &config.model,
    )?);
    info!(model = %config.model, "Completion provider configured");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let processor = TurnProcessor::new(
        provider,
        store.clone(),
        images.clone(),
        TurnSettings {
            image_folder: config.image_folder.clone(),
            stream_idle_timeout: config.stream_idle_timeout,
            max_payload_bytes: config.max_payload_bytes,
        },
    );
    let state = AppState {
        chats: ChatService::new(store, images, config.image_folder.clone()),
        connections: ConnectionManager::new(Arc::new(processor)),
        max_payload_bytes: config.max_payload_bytes,
    };
    let app = routes::router(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/ (WebSocket on ws://{addr}/)");

    axum::serve(listener, app).await?;
    Ok(())
}
