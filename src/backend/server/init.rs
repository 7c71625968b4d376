/**
 * Server Initialization
 *
 * This module handles the initialization and setup of the Axum HTTP server,
 * including store selection, service wiring, and route configuration.
 *
 * # Initialization Process
 *
 * The server initialization follows these steps:
 * 1. Load the optional PostgreSQL pool (migrations run here)
 * 2. Pick the store: Postgres when reachable, in-memory otherwise
 * 3. Start the fan-out hub event loop
 * 4. Wire the pipeline and read-state engine over the store and notifier
 * 5. Create and configure the router
 */
use std::sync::Arc;

use axum::Router;

use crate::backend::auth::TokenKeys;
use crate::backend::messaging::links::{HttpOgpFetcher, NoopOgpFetcher, OgpFetcher};
use crate::backend::realtime::hub::HubHandle;
use crate::backend::realtime::notifier::HubNotifier;
use crate::backend::routes::router::create_router;
use crate::backend::server::config::{load_database, ServerConfig};
use crate::backend::server::state::AppState;
use crate::backend::store::{MemoryStore, PgStore, Store};

/// Create and configure the Axum application
///
/// # Error Handling
///
/// The function is designed to be resilient:
/// - Missing or unreachable database: the in-memory store is used
/// - Migration failures: logged but don't prevent startup
/// - OGP client construction failure: link previews degrade to URL-only rows
pub async fn create_app(config: ServerConfig) -> Router<()> {
    tracing::info!("Initializing teamchat backend server");

    let store: Arc<dyn Store> = match load_database(config.database_url.as_deref()).await {
        Some(pool) => Arc::new(PgStore::new(pool)),
        None => Arc::new(MemoryStore::new()),
    };

    let app_state = build_state(&config, store);
    tracing::info!("Services initialized");

    create_router(app_state)
}

/// Wire services over `store`, starting a hub event loop
pub fn build_state(config: &ServerConfig, store: Arc<dyn Store>) -> AppState {
    let hub = HubHandle::spawn(config.app.realtime.hub_queue_capacity);
    let notifier = Arc::new(HubNotifier::new(hub.clone()));

    AppState::new(
        store,
        hub,
        notifier,
        ogp_fetcher(config),
        TokenKeys::from_secret(&config.jwt_secret),
        config.app.clone(),
    )
}

fn ogp_fetcher(config: &ServerConfig) -> Arc<dyn OgpFetcher> {
    let Some(endpoint) = config.app.ogp_service_url.as_deref() else {
        tracing::info!("OGP_SERVICE_URL not set. Link previews will carry the URL only.");
        return Arc::new(NoopOgpFetcher);
    };

    match HttpOgpFetcher::new(endpoint, config.app.ogp_timeout) {
        Ok(fetcher) => {
            tracing::info!(endpoint = %endpoint, "OGP service configured");
            Arc::new(fetcher)
        }
        Err(e) => {
            tracing::error!("Failed to create OGP client: {}", e);
            Arc::new(NoopOgpFetcher)
        }
    }
}
