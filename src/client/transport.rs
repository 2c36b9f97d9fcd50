use crate::protocol::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{sleep, timeout, Duration},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

const CHANNEL_BUFFER: usize = 4;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
}

/// Both halves of an open relay connection.
pub struct RelayChannel {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(url: &str, max_retries: u32) -> Result<RelayChannel, TransportError> {
    let socket = connect_with_retry(url, max_retries).await?;
    tracing::info!("Connected to relay at {}", url);
    Ok(spawn_channel(socket))
}

async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Socket, TransportError> {
    let mut retry_delay = Duration::from_millis(50);
    let max_retry_delay = Duration::from_secs(1);
    let mut retry_count = 0;

    while retry_count <= max_retries {
        match timeout(Duration::from_secs(1), connect_async(url)).await {
            Ok(Ok((socket, _response))) => return Ok(socket),
            Ok(Err(e)) => {
                tracing::error!("Failed to connect to relay: {:?}", e);
            }
            Err(_) => {
                tracing::error!("Connection timeout");
            }
        }

        retry_count += 1;
        let jitter = rand::random::<f32>() * 0.2 + 0.9;
        sleep(retry_delay.mul_f32(jitter)).await;
        retry_delay = (retry_delay * 2).min(max_retry_delay);
    }

    Err(TransportError::MaxRetriesExceeded)
}

fn spawn_channel(socket: Socket) -> RelayChannel {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(CHANNEL_BUFFER);

    tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode client event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::text(text)).await {
                tracing::error!("Failed to send frame: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("Relay connection error: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(event) => {
                    if inbound_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Ignoring unexpected server message: {}", e),
            }
        }
        tracing::info!("Relay connection closed");
    });

    RelayChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}
