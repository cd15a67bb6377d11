use crate::bridge::Transcoder;
use crate::config::ServerConfig;
use crate::media::MediaEngine;
use crate::signaling::{AppState, SignalingEngine, SignalingService, ws_handler};
use crate::store::SessionStore;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

/// The assembled signaling server: websocket registry plus engine.
#[derive(Clone)]
pub struct DuetServer {
    state: AppState,
}

impl DuetServer {
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: &ServerConfig,
        media: Arc<dyn MediaEngine>,
        store: Arc<dyn SessionStore>,
        transcoder: Option<Arc<dyn Transcoder>>,
    ) -> Self {
        let signaling = SignalingService::new();
        let engine = SignalingEngine::new(
            config,
            media,
            store,
            Arc::new(signaling.clone()),
            transcoder,
        );

        Self {
            state: AppState { signaling, engine },
        }
    }

    pub fn engine(&self) -> &SignalingEngine {
        &self.state.engine
    }

    pub fn signaling(&self) -> &SignalingService {
        &self.state.signaling
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }
}

async fn health() -> &'static str {
    "ok"
}
