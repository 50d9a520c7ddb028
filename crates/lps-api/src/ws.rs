//! Observer WebSocket endpoint.
//!
//! Every session joins the implicit `all` room on connect and manages its
//! country/loan rooms with JSON commands
//! (`{"action": "subscribe_country", "country_code": "ES"}` …). Events the
//! session's rooms match are pushed as they arrive on the hub bus; there is
//! no backlog for late joiners.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use lps_realtime::{Command, Subscriptions};

use crate::state::AppState;

pub(crate) async fn loans_socket(
    State(st): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| session(socket, st))
}

async fn session(mut socket: WebSocket, st: Arc<AppState>) {
    let mut bus = st.hub.subscribe();
    let mut subscriptions = Subscriptions::new();

    info!(sessions = st.hub.session_count(), "observer connected");

    loop {
        tokio::select! {
            published = bus.recv() => {
                match published {
                    Ok(published) => {
                        if !subscriptions.wants(&published) {
                            continue;
                        }
                        let Ok(text) = serde_json::to_string(&published.event) else {
                            continue;
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Best-effort delivery: drop what the session missed.
                        warn!(missed, "observer session lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let ack = match serde_json::from_str::<Command>(&text) {
                            Ok(command) => subscriptions.apply(command),
                            Err(_) => json!({"error": "Unknown command"}),
                        };
                        if socket
                            .send(Message::Text(ack.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "observer socket error");
                        break;
                    }
                }
            }
        }
    }

    // Subscriptions die with the session.
    info!("observer disconnected");
}
