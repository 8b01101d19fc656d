//! WebSocket client for a board server.
//!
//! Requests are written by a writer task; a reader task routes each
//! response to the caller waiting on its request id, so one client can
//! have several requests in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use threadline_core::{Document, Message, MessageId};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use uuid::Uuid;

use crate::protocol::{BoardRequest, BoardResponse, ProtocolError, ResponseBody};

/// How long a request waits for its response by default.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<BoardResponse>>>>;

/// A connected board client.
pub struct BoardClient {
    server_url: String,
    outgoing_tx: mpsc::Sender<String>,
    pending: Pending,
    state: Arc<RwLock<ConnectionState>>,
    writer_task: JoinHandle<()>,
    request_timeout: Duration,
}

impl BoardClient {
    /// Connect to `ws://host:port`.
    pub async fn connect(server_url: impl Into<String>) -> Result<Self, ProtocolError> {
        let server_url = server_url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(server_url.as_str())
            .await
            .map_err(|e| {
                log::warn!("Failed to connect to {server_url}: {e}");
                ProtocolError::ConnectionClosed
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket, close when the
        // channel is dropped
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let writer_task = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer
                    .send(tungstenite::Message::Text(text.into()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = ws_writer.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        // Reader task: route responses to their waiting requests
        let reader_pending = pending.clone();
        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => match BoardResponse::decode(&text) {
                        Ok(response) => {
                            let waiter = reader_pending.lock().await.remove(&response.request_id());
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => log::warn!(
                                    "Response for unknown request {}",
                                    response.request_id()
                                ),
                            }
                        }
                        Err(e) => log::warn!("Undecodable response: {e}"),
                    },
                    Ok(tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // State flips under the pending lock so `request` never registers
            // a waiter after the clear
            let mut pending = reader_pending.lock().await;
            *reader_state.write().await = ConnectionState::Disconnected;
            // Dropping the senders wakes every waiter with a closed channel
            pending.clear();
        });

        log::info!("Connected to board at {server_url}");
        Ok(Self {
            server_url,
            outgoing_tx: out_tx,
            pending,
            state,
            writer_task,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Post a message. Server-side rejections come back as
    /// [`ProtocolError::Rejected`] carrying the server's error text.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        content: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Result<Message, ProtocolError> {
        match self.request(BoardRequest::create(name, content, parent_id)).await? {
            ResponseBody::Message(message) => Ok(message),
            ResponseBody::Document(_) => Err(ProtocolError::UnexpectedResponse),
        }
    }

    /// Read the whole board.
    pub async fn fetch(&self) -> Result<Document, ProtocolError> {
        match self.request(BoardRequest::fetch()).await? {
            ResponseBody::Document(document) => Ok(document),
            ResponseBody::Message(_) => Err(ProtocolError::UnexpectedResponse),
        }
    }

    /// Send one request and wait for the response with the same id.
    pub async fn request(&self, request: BoardRequest) -> Result<ResponseBody, ProtocolError> {
        let request_id = request.request_id();
        let encoded = request.encode()?;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if *self.state.read().await != ConnectionState::Connected {
                return Err(ProtocolError::ConnectionClosed);
            }
            pending.insert(request_id, tx);
        }

        if self.outgoing_tx.send(encoded).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(ProtocolError::ConnectionClosed);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                return Err(ProtocolError::Timeout);
            }
        };

        match response {
            BoardResponse::Ok { body, .. } => Ok(body),
            BoardResponse::Error { error, .. } => Err(ProtocolError::Rejected(error)),
        }
    }

    /// Close the connection after flushing queued requests.
    pub async fn close(self) {
        drop(self.outgoing_tx);
        let _ = self.writer_task.await;
        *self.state.write().await = ConnectionState::Disconnected;
        log::debug!("Disconnected from {}", self.server_url);
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Requests still waiting for a response.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }
}
