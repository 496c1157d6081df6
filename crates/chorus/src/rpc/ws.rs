//! WebSocket transport: one channel per connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, future};
use tracing::{debug, info, warn};

use super::{CloseMode, RpcHandler, run_connection};
use crate::notify::{Channel, MpscChannel};

/// Outbound frames buffered per connection before senders wait.
const OUTBOUND_CAPACITY: usize = 256;

/// Drive an upgraded socket until the client goes away.
pub async fn serve_socket(socket: WebSocket, handler: Arc<RpcHandler>) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (channel, mut rx) = MpscChannel::new(OUTBOUND_CAPACITY);
    let channel: Arc<dyn Channel> = Arc::new(channel);
    let channel_id = channel.id().to_string();
    info!(channel_id = %channel_id, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let inbound = Box::pin(
        ws_receiver
            .take_while(|frame| future::ready(matches!(frame, Ok(m) if !matches!(m, Message::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(text.to_string()),
                    Ok(Message::Binary(_)) => {
                        debug!("Ignoring binary frame");
                        None
                    }
                    _ => None,
                })
            }),
    );

    run_connection(handler, channel, inbound, CloseMode::Detach).await;

    // In-flight turns may still hold the channel; nothing can reach the client now.
    writer.abort();
    info!(channel_id = %channel_id, "WebSocket disconnected");
}
