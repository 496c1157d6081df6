use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use chorus_protocol::{Request, RequestId, Response};

use super::{RpcError, RpcHandler};
use crate::notify::Channel;

/// What to do with in-flight requests once the inbound stream ends.
///
/// Either way the channel association is gone once the last in-flight
/// request has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Leave them running in the background and return at once. Their
    /// notifications are dropped once the channel association is gone.
    Detach,
    /// Wait for them so every response is written before returning.
    Drain,
}

/// Serve one channel until its inbound stream ends.
///
/// Each request runs in its own task, so a `session.switch_agent` can be
/// handled while a turn is still streaming. On close the channel association
/// is removed; the session itself is retained for a later resume.
pub async fn run_connection<S>(
    handler: Arc<RpcHandler>,
    channel: Arc<dyn Channel>,
    mut inbound: S,
    mode: CloseMode,
) where
    S: Stream<Item = String> + Unpin,
{
    let mut tasks = JoinSet::new();
    debug!(channel_id = %channel.id(), "Connection opened");

    while let Some(frame) = inbound.next().await {
        // Reap finished requests so the set does not grow unbounded.
        while tasks.try_join_next().is_some() {}

        let request = match decode_request(&frame) {
            Ok(request) => request,
            Err((id, e)) => {
                debug!(channel_id = %channel.id(), error = %e.message, "Rejected inbound frame");
                send(&channel, Response::failure(id, e.into())).await;
                continue;
            }
        };

        let handler = handler.clone();
        let channel = channel.clone();
        tasks.spawn(async move {
            let response = handler.handle(&channel, request).await;
            send(&channel, response).await;
        });
    }

    match mode {
        CloseMode::Detach => {
            handler.registry().detach_channel(channel.id());
            // Requests still in flight may bind the closed channel again
            // (a start racing the close), so detach once more after them.
            let registry = handler.registry().clone();
            let channel_id = channel.id().to_string();
            tokio::spawn(async move {
                drain(&mut tasks).await;
                registry.detach_channel(&channel_id);
            });
        }
        CloseMode::Drain => {
            drain(&mut tasks).await;
            handler.registry().detach_channel(channel.id());
        }
    }
    debug!(channel_id = %channel.id(), "Connection closed");
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = ?e, "Request task panicked");
        }
    }
}

/// Parse a frame, recovering the request id for the error reply when possible.
fn decode_request(frame: &str) -> Result<Request, (Option<RequestId>, RpcError)> {
    let value: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| (None, RpcError::parse_error(format!("invalid json: {e}"))))?;

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    serde_json::from_value::<Request>(value)
        .map_err(|e| (id, RpcError::parse_error(format!("invalid request: {e}"))))
}

async fn send(channel: &Arc<dyn Channel>, response: Response) {
    if let Err(e) = channel.send(response.into()).await {
        debug!(channel_id = %channel.id(), error = %e, "Dropped response for closed channel");
    }
}
