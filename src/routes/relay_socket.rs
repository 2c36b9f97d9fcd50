use crate::{protocol::ServerEvent, server::SharedState, session::run_session};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::instrument;

const OUTBOUND_BUFFER: usize = 4;

#[instrument(skip(ws, state))]
pub async fn relay_socket(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode server event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                tracing::debug!("Socket write failed: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    let inbound = receiver
        .take_while(|message| {
            future::ready(match message {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("Socket read failed: {}", e);
                    false
                }
            })
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(_)) => {
                    tracing::warn!("Ignoring binary message");
                    None
                }
                _ => None,
            })
        });

    run_session(state, Box::pin(inbound), outbound_tx).await;

    if let Err(e) = writer.await {
        tracing::error!("Socket writer task failed: {}", e);
    }
}
