//! # WebSocket Subscribers
//!
//! Accepts dashboard connections and registers each one with the
//! [`TelemetryHub`]. Clients never send commands; the per-connection task
//! only waits for the remote end to go away, then deregisters.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::{Subscriber, TelemetryHub};
use crate::error::{GroundlinkError, Result};

/// Write half of one WebSocket connection
pub struct WsSubscriber<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
}

impl<S> WsSubscriber<S> {
    pub fn new(sink: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl<S> Subscriber for WsSubscriber<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, payload: Bytes) -> Result<()> {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| GroundlinkError::Subscriber(format!("envelope is not UTF-8: {}", e)))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(text)).await?;
        Ok(())
    }
}

/// Accept connections forever, one task per client
pub async fn serve(listener: TcpListener, hub: Arc<TelemetryHub>) -> Result<()> {
    info!("Live updates on ws://{}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, hub).await {
                debug!("Connection {} ended with error: {}", peer, e);
            }
        });
    }
}

/// Run one client from handshake to disconnect
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, hub: Arc<TelemetryHub>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream).await?;
    info!("WebSocket client connected: {}", peer);

    let (sink, mut incoming) = ws.split();
    let id = hub.register(Arc::new(WsSubscriber::new(sink))).await;

    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket client {} errored: {}", peer, e);
                break;
            }
        }
    }

    hub.unregister(id);
    info!("WebSocket client disconnected: {}", peer);
    Ok(())
}
