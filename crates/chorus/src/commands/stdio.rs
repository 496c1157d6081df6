//! JSON Lines transport over stdin/stdout.
//!
//! One request per input line; responses and notifications are written one
//! per output line. Logs go to stderr so stdout stays machine-readable.

use std::sync::Arc;

use anyhow::Result;
use futures::stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use chorus::notify::{Channel, MpscChannel};
use chorus::rpc::{CloseMode, RpcHandler, run_connection};

const OUTBOUND_CAPACITY: usize = 256;

pub async fn run(config_path: &str) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let registry = super::load_registry(&config)?;
    let handler = Arc::new(RpcHandler::new(registry.clone()));

    let (channel, mut rx) = MpscChannel::new(OUTBOUND_CAPACITY);
    let channel: Arc<dyn Channel> = Arc::new(channel);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound frame");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let inbound = Box::pin(stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some((line, lines)),
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    }));

    info!("Serving on stdio");
    run_connection(handler, channel, inbound, CloseMode::Drain).await;

    registry.shutdown().await;
    // Dropping the last channel handle lets the writer flush and exit.
    if let Err(e) = writer.await {
        warn!(error = ?e, "Stdout writer task failed");
    }
    Ok(())
}
