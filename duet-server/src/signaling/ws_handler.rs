use crate::signaling::{Flow, SignalingEngine, SignalingOutput, SignalingService};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use duet_core::PeerId;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How long queued outbound frames may take to flush once the client side
/// is done.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    pub signaling: SignalingService,
    pub engine: SignalingEngine,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = PeerId::new();
    info!("New WebSocket connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    state.signaling.add_peer(peer_id.clone(), tx);
    state.engine.connect(&peer_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let state = state.clone();
        let peer_id = peer_id.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        if state.engine.handle_text(&peer_id, text.as_str()).await
                            == Flow::Terminate
                        {
                            state.signaling.close(&peer_id);
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        warn!("Ignoring binary frame from {}", peer_id);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    // The receive side is never aborted: a handler still awaiting the media
    // engine or the store runs to completion before teardown.
    tokio::select! {
        _ = (&mut send_task) => {
            let _ = recv_task.await;
        }
        _ = (&mut recv_task) => {
            state.signaling.remove_peer(&peer_id);
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    };

    state.signaling.remove_peer(&peer_id);
    state.engine.disconnect(&peer_id).await;
    info!("WebSocket disconnected: {}", peer_id);
}
