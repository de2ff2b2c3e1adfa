//! Newline-delimited JSON command ingress.
//!
//! Stand-in for the external transport that carries the command surface in
//! production: one JSON object per line in, one JSON object per line out.
//! Dispatching blocks on the worker queues, so it runs on the blocking pool.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::commands::CommandDispatcher;

pub async fn serve(listen: &str, dispatcher: Arc<CommandDispatcher>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "command ingress listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "command client connected");
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, dispatcher).await {
                warn!(%peer, error = %e, "command client failed");
            }
        });
    }
}

async fn handle_client(
    socket: tokio::net::TcpStream,
    dispatcher: Arc<CommandDispatcher>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let dispatcher = dispatcher.clone();
        let response = tokio::task::spawn_blocking(move || dispatcher.dispatch(&line))
            .await
            .unwrap_or_else(|_| {
                crate::commands::failure("parse-error", "internal dispatch failure")
            });
        let mut payload = response.to_string();
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}
