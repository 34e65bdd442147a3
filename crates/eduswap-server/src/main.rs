//! # eduswap-server
//!
//! Backend for the EduSwap peer tutoring exchange.
//!
//! This binary provides:
//! - **Swap lifecycle engine** with in-memory indices mirroring SQLite
//! - **Swap chat** with ordering, unread counters, and edit/delete rules
//! - **Real-time fanout** over WebSockets, scoped per swap group
//! - **Presence tracking** with a soft-online grace window
//! - **AI tutor chat** streaming from an OpenAI-compatible provider
//! - **REST API** (axum) for swap actions, chat hydration, reviews, and
//!   matching

mod ai;
mod ai_hub;
mod api;
mod chat;
mod config;
mod directory;
mod engine;
mod error;
mod events;
mod files;
mod gateway;
mod hub;
mod matching;
mod presence;
mod reviews;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use eduswap_store::Database;

use crate::ai::{AiChatService, OpenAiProvider};
use crate::ai_hub::AiHub;
use crate::api::AppState;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::directory::StudentDirectory;
use crate::engine::SwapEngine;
use crate::files::FileStore;
use crate::gateway::Gateway;
use crate::hub::ChatHub;
use crate::matching::MatchFinder;
use crate::presence::PresenceHub;
use crate::reviews::RatingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eduswap_server=debug")),
        )
        .init();

    info!("Starting EduSwap server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage and rehydrate the in-memory indices
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let gateway = Arc::new(Gateway::new(database, config.storage_timeout));

    // Every cache must be fully hydrated before the listener binds; no
    // request may observe a partial cache.
    let engine = Arc::new(SwapEngine::load(gateway.clone()).await?);
    let directory = Arc::new(StudentDirectory::load(gateway.clone()).await?);

    // -----------------------------------------------------------------------
    // 4. Assemble services
    // -----------------------------------------------------------------------
    let files = Arc::new(
        FileStore::new(config.file_storage_path.clone(), config.max_file_size).await?,
    );
    let chat = Arc::new(ChatService::new(gateway.clone(), engine.clone()));
    let hub = Arc::new(ChatHub::new(
        engine.clone(),
        chat.clone(),
        directory.clone(),
        files.clone(),
    ));

    if config.ai_token.is_none() {
        info!("EDUSWAP_AI_TOKEN is not set; the AI tutor will degrade to no replies");
    }
    let provider = Arc::new(OpenAiProvider::new(
        config.ai_endpoint.clone(),
        config.ai_token.clone(),
        config.ai_model.clone(),
    ));
    let ai = Arc::new(AiChatService::new(gateway.clone(), provider));
    let ai_hub = Arc::new(AiHub::new(ai.clone(), files.clone()));

    let presence = Arc::new(PresenceHub::new(directory.clone()));
    let rating = Arc::new(RatingService::new(gateway.clone(), engine.clone()));
    let matching = Arc::new(MatchFinder::new(gateway.clone()));

    let http_addr = config.http_addr;
    let state = AppState {
        config: Arc::new(config),
        engine,
        chat,
        hub,
        ai,
        ai_hub,
        presence,
        directory,
        rating,
        matching,
        files,
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
