use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use ulid::Ulid;

use chorus_protocol::ServerMessage;

/// Prefix for generated channel ids.
pub const CHANNEL_ID_PREFIX: &str = "ch_";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
}

/// Outbound half of a client connection.
///
/// Responses and notifications both flow through `send`; inbound frames are
/// read by the transport and never touch this trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable id used for the registry's channel association.
    fn id(&self) -> &str;

    async fn send(&self, message: ServerMessage) -> Result<(), ChannelError>;
}

/// Channel backed by a bounded mpsc queue drained by a transport writer task.
pub struct MpscChannel {
    id: String,
    tx: mpsc::Sender<ServerMessage>,
}

impl MpscChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let channel = Self {
            id: format!("{}{}", CHANNEL_ID_PREFIX, Ulid::new()),
            tx,
        };
        (channel, rx)
    }
}

#[async_trait]
impl Channel for MpscChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: ServerMessage) -> Result<(), ChannelError> {
        self.tx.send(message).await.map_err(|_| ChannelError::Closed)
    }
}
