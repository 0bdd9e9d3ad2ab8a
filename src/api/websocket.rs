use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::sessions::SessionSender;
use crate::api::state::AppState;
use crate::api::types::{ClientMessage, ServerMessage, UserRef};
use crate::engine::ExecutionResult;

/// WebSocket handler for the real-time trading channel
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Every outbound message for this connection goes through one queue,
    // so direct replies and pushes keep their order
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(tx);
    debug!("WebSocket session {} opened", session.id);

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => session.handle_text(&state, &text).await,
            Message::Close(_) => break,
            // Axum answers pings itself
            _ => {}
        }
    }

    if let Some(user_id) = session.user_id {
        state.sessions.unregister(user_id, session.id);
    }

    // Abort the send task when connection closes
    send_task.abort();

    info!("WebSocket session {} closed", session.id);
}

struct Session {
    id: Uuid,
    user_id: Option<i64>,
    tx: SessionSender,
}

impl Session {
    fn new(tx: SessionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            tx,
        }
    }

    fn reply(&self, msg: ServerMessage) {
        // The send task only stops once the socket is gone
        let _ = self.tx.send(msg);
    }

    fn bind(&mut self, state: &AppState, user_id: i64) {
        if let Some(previous) = self.user_id.replace(user_id) {
            if previous != user_id {
                state.sessions.unregister(previous, self.id);
            }
        }
        state.sessions.register(user_id, self.id, self.tx.clone());
    }

    async fn send_snapshot(&self, state: &AppState, user_id: i64) {
        match state.service.snapshot(user_id).await {
            Ok(snapshot) => self.reply(ServerMessage::Snapshot(Box::new(snapshot))),
            Err(e) => {
                warn!("Snapshot for user {} failed: {}", user_id, e);
                self.reply(ServerMessage::error(e.user_message()));
            }
        }
    }

    async fn handle_text(&mut self, state: &AppState, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Malformed client message: {}", e);
                self.reply(ServerMessage::error(format!("invalid message: {e}")));
                return;
            }
        };

        match msg {
            ClientMessage::Bootstrap {
                username,
                initial_capital,
            } => match state.service.bootstrap(&username, initial_capital).await {
                Ok(user) => {
                    self.bind(state, user.id);
                    self.reply(ServerMessage::BootstrapOk {
                        user: UserRef::from(&user),
                    });
                    self.send_snapshot(state, user.id).await;
                }
                Err(e) => self.reply(ServerMessage::error(e.user_message())),
            },
            ClientMessage::Subscribe { user_id } => match state.service.get_user(user_id).await {
                Ok(user) => {
                    self.bind(state, user.id);
                    self.send_snapshot(state, user.id).await;
                }
                Err(e) => self.reply(ServerMessage::error(e.user_message())),
            },
            ClientMessage::GetSnapshot => {
                let Some(user_id) = self.authenticated() else {
                    return;
                };
                self.send_snapshot(state, user_id).await;
            }
            ClientMessage::GetTrades => {
                let Some(user_id) = self.authenticated() else {
                    return;
                };
                match state.service.recent_trades(user_id).await {
                    Ok(trades) => self.reply(ServerMessage::Trades { trades }),
                    Err(e) => self.reply(ServerMessage::error(e.user_message())),
                }
            }
            ClientMessage::PlaceOrder(payload) => {
                let Some(user_id) = self.authenticated() else {
                    return;
                };
                match state.service.place_order(user_id, payload.into()).await {
                    Ok(outcome) => match outcome.execution {
                        ExecutionResult::Pending(reason) => {
                            self.reply(ServerMessage::OrderPending {
                                order_id: outcome.order.id,
                                order_no: outcome.order.order_no,
                                reason: reason.to_string(),
                            });
                            self.send_snapshot(state, user_id).await;
                        }
                        // order_filled and the snapshot arrive through the event forwarder
                        ExecutionResult::Filled(_) => {}
                    },
                    Err(e) => self.reply(ServerMessage::error(e.user_message())),
                }
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
            ClientMessage::Unknown => self.reply(ServerMessage::error("unknown message")),
        }
    }

    fn authenticated(&self) -> Option<i64> {
        if self.user_id.is_none() {
            self.reply(ServerMessage::error("not authenticated"));
        }
        self.user_id
    }
}
