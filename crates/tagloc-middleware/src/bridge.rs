//! Ingest and fan-out bridge.
//!
//! - **Ingest**: detection batches arrive as newline-delimited JSON, one
//!   [`DetectionBatch`] per line. [`read_batches`] parses a stream of such
//!   lines and forwards each batch, in order, into a bounded channel that the
//!   localizer node drains. Malformed lines are logged and skipped.
//!
//! - **Fan-out**: [`WsBridge::run_ws_server`] serves a WebSocket endpoint where
//!   every connected client receives every event on the bus as a JSON text
//!   frame. Clients may also push detection batches back as text frames.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tagloc_types::{DetectionBatch, LocalizerError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;

/// Parse one NDJSON line. Blank lines yield `Ok(None)`.
pub fn parse_batch_line(line: &str) -> Result<Option<DetectionBatch>, LocalizerError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| LocalizerError::Serialization(format!("bad detection batch: {e}")))
}

/// Forward every batch read from `reader` into `tx`.
///
/// Stops at end of input or when the receiving side is dropped. Returns the
/// number of batches forwarded.
///
/// # Errors
///
/// Returns [`LocalizerError::Io`] only for I/O errors on the reader;
/// malformed lines are skipped.
pub async fn read_batches<R>(reader: R, tx: mpsc::Sender<DetectionBatch>) -> Result<usize, LocalizerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0usize;
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| LocalizerError::Io(format!("read error: {e}")))?
    {
        line_no += 1;
        match parse_batch_line(&line) {
            Ok(Some(batch)) => {
                if tx.send(batch).await.is_err() {
                    debug!(line = line_no, "ingest receiver closed; stopping");
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed detection batch"),
        }
    }
    Ok(forwarded)
}

/// WebSocket front-end over an [`EventBus`].
#[derive(Clone)]
pub struct WsBridge {
    bus: EventBus,
    ingest: Option<mpsc::Sender<DetectionBatch>>,
}

impl WsBridge {
    /// Fan-out only: incoming client frames are ignored.
    pub fn new(bus: EventBus) -> Self {
        Self { bus, ingest: None }
    }

    /// Also accept detection batches from clients and forward them to `ingest`.
    pub fn with_ingest(bus: EventBus, ingest: mpsc::Sender<DetectionBatch>) -> Self {
        Self {
            bus,
            ingest: Some(ingest),
        }
    }

    /// Start a WebSocket server on `addr`. Runs until a fatal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizerError::Io`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), LocalizerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LocalizerError::Io(format!("ws bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Accept WebSocket clients on an already bound `listener`, forever.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LocalizerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "pose WebSocket server listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), LocalizerError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| LocalizerError::Io(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let json = serde_json::to_string(&event)
                                .map_err(|e| LocalizerError::Serialization(e.to_string()))?;
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str());
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Forward a client-supplied detection batch. Returns whether it was
    /// accepted; anything unparsable, or a full ingest queue, drops it.
    fn handle_incoming_ws_message(&self, text: &str) -> bool {
        let Some(ingest) = &self.ingest else {
            return false;
        };
        match parse_batch_line(text) {
            Ok(Some(batch)) => match ingest.try_send(batch) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "ingest queue rejected ws batch");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "ignoring ws frame");
                false
            }
        }
    }
}
