/**
 * Application State Management
 *
 * This module defines the application state structure and implements
 * the necessary `FromRef` traits for Axum state extraction.
 *
 * # Architecture
 *
 * `AppState` is the central state container. It holds:
 * - The store (Postgres or in-memory) behind the `Store` port
 * - The message pipeline and the read-state engine
 * - A handle to the fan-out hub event loop
 * - Token keys and the validated application config
 *
 * # Thread Safety
 *
 * Every field is cheap to clone and `Send + Sync`: services share their
 * dependencies through `Arc`, and the hub is reached only through its
 * queue handle.
 */
use std::sync::Arc;

use axum::extract::FromRef;

use crate::backend::auth::TokenKeys;
use crate::backend::messaging::links::OgpFetcher;
use crate::backend::messaging::pipeline::MessagePipeline;
use crate::backend::messaging::read_state::ReadStateEngine;
use crate::backend::realtime::hub::HubHandle;
use crate::backend::realtime::notifier::Notifier;
use crate::backend::store::Store;
use crate::shared::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: MessagePipeline,
    pub read_state: ReadStateEngine,
    pub hub: HubHandle,
    pub keys: Arc<TokenKeys>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire services over one store and one notifier
    pub fn new(
        store: Arc<dyn Store>,
        hub: HubHandle,
        notifier: Arc<dyn Notifier>,
        ogp: Arc<dyn OgpFetcher>,
        keys: TokenKeys,
        config: AppConfig,
    ) -> Self {
        Self {
            pipeline: MessagePipeline::new(store.clone(), notifier.clone(), ogp),
            read_state: ReadStateEngine::new(store.clone(), notifier),
            store,
            hub,
            keys: Arc::new(keys),
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for MessagePipeline {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.pipeline.clone()
    }
}

impl FromRef<AppState> for ReadStateEngine {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.read_state.clone()
    }
}

impl FromRef<AppState> for HubHandle {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.hub.clone()
    }
}
