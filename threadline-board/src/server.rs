//! WebSocket board server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── spawn_blocking ──┐
//!             ├── text frame (JSON) ──► │  MessageBoard      │ ── Store
//! Client B ──┘                         │  submit / fetch    │    (file | rocks | memory)
//!                                      └────────────────────┘
//! ```
//!
//! Each connection runs in its own task. Store work runs on the blocking
//! pool and is never cancelled once started, so a client that disconnects
//! mid-request cannot leave a submit half applied.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use threadline_core::{BoardConfig, OrphanPolicy};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::board::MessageBoard;
use crate::protocol::{BoardRequest, BoardResponse};
use crate::storage::{
    CorruptionPolicy, FileStore, FileStoreConfig, MemoryStore, RocksStore, RocksStoreConfig,
    Store, StoreError,
};

/// The board type served over the wire; the backend is chosen at startup.
pub type SharedBoard = Arc<MessageBoard<Box<dyn Store>>>;

/// Where the server keeps the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Lost on restart
    Memory,
    /// Single JSON file with an advisory lock
    File(PathBuf),
    /// RocksDB directory
    Rocks(PathBuf),
}

impl StorageBackend {
    /// Open the backend.
    pub fn open(&self, corruption_policy: CorruptionPolicy) -> Result<Box<dyn Store>, StoreError> {
        let store: Box<dyn Store> = match self {
            StorageBackend::Memory => Box::new(MemoryStore::new()),
            StorageBackend::File(path) => Box::new(FileStore::open(FileStoreConfig {
                path: path.clone(),
                corruption_policy,
                ..FileStoreConfig::default()
            })?),
            StorageBackend::Rocks(path) => Box::new(RocksStore::open(RocksStoreConfig {
                path: path.clone(),
                corruption_policy,
                ..RocksStoreConfig::default()
            })?),
        };
        Ok(store)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Storage backend
    pub backend: StorageBackend,
    /// Reaction to an unreadable persisted board
    pub corruption_policy: CorruptionPolicy,
    /// Retention, word limit, orphan handling
    pub board: BoardConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            backend: StorageBackend::File(PathBuf::from("messages.json")),
            corruption_policy: CorruptionPolicy::Fail,
            board: BoardConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from `THREADLINE_*` environment variables,
    /// falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("THREADLINE_BIND") {
            config.bind_addr = bind;
        }

        let data = lookup("THREADLINE_DATA").map(PathBuf::from);
        let backend = lookup("THREADLINE_BACKEND").unwrap_or_else(|| "file".to_string());
        config.backend = match backend.to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "file" => StorageBackend::File(data.unwrap_or_else(|| PathBuf::from("messages.json"))),
            "rocks" | "rocksdb" => StorageBackend::Rocks(
                data.unwrap_or_else(|| RocksStoreConfig::default().path),
            ),
            other => {
                return Err(ServerError::Config(format!(
                    "THREADLINE_BACKEND must be memory, file or rocks (got {other:?})"
                )))
            }
        };

        if let Some(value) = lookup("THREADLINE_MAX_MESSAGES") {
            config.board.max_messages = parse_number("THREADLINE_MAX_MESSAGES", &value)?;
        }
        if let Some(value) = lookup("THREADLINE_MAX_WORDS") {
            config.board.max_words = parse_number("THREADLINE_MAX_WORDS", &value)?;
        }
        if let Some(value) = lookup("THREADLINE_REJECT_ORPHANS") {
            if parse_flag("THREADLINE_REJECT_ORPHANS", &value)? {
                config.board.orphan_policy = OrphanPolicy::Reject;
            }
        }
        if let Some(value) = lookup("THREADLINE_TOLERATE_CORRUPTION") {
            if parse_flag("THREADLINE_TOLERATE_CORRUPTION", &value)? {
                config.corruption_policy = CorruptionPolicy::TreatAsEmpty;
            }
        }

        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize, ServerError> {
    value
        .trim()
        .parse()
        .map_err(|e| ServerError::Config(format!("{key}={value:?}: {e}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ServerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ServerError::Config(format!("{key}={value:?} is not a boolean"))),
    }
}

/// Server errors.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid configuration
    Config(String),
    /// The store could not be opened
    Store(StoreError),
    /// Socket failure
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "Configuration error: {e}"),
            ServerError::Store(e) => write!(f, "Store error: {e}"),
            ServerError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Store(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    /// Frames that carried a request, parseable or not
    pub total_requests: u64,
    pub submits: u64,
    pub fetches: u64,
    /// Requests refused for their content (word limit, unknown parent, bad frame)
    pub rejections: u64,
    /// Requests that failed in the store
    pub failures: u64,
}

/// The board server.
pub struct BoardServer {
    bind_addr: String,
    board: SharedBoard,
    stats: Arc<RwLock<ServerStats>>,
}

impl BoardServer {
    /// Open the configured store and build a server around it.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store = config.backend.open(config.corruption_policy)?;
        log::info!("Board backed by {} store ({:?})", store.kind(), config.backend);
        Ok(Self::with_board(
            config.bind_addr,
            MessageBoard::new(store, config.board),
        ))
    }

    /// Serve an already constructed board.
    pub fn with_board(bind_addr: impl Into<String>, board: MessageBoard<Box<dyn Store>>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            board: Arc::new(board),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// In-memory board with default limits.
    pub fn in_memory(bind_addr: impl Into<String>) -> Self {
        Self::with_board(bind_addr, MessageBoard::with_defaults(Box::new(MemoryStore::new())))
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve connections from an existing listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Board server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let board = self.board.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, board, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        board: SharedBoard,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = async {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let response = Self::respond(&text, &board, &stats).await;
                        ws_sender.send(Message::Text(response.encode()?.into())).await?;
                    }
                    Ok(Message::Binary(_)) => {
                        {
                            let mut s = stats.write().await;
                            s.total_requests += 1;
                            s.rejections += 1;
                        }
                        let response = BoardResponse::error(Uuid::nil(), "Binary frames are not supported");
                        ws_sender.send(Message::Text(response.encode()?.into())).await?;
                    }
                    Ok(Message::Ping(data)) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        stats.write().await.active_connections -= 1;
        result
    }

    /// Decode one text frame and produce its response.
    async fn respond(
        text: &str,
        board: &SharedBoard,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> BoardResponse {
        stats.write().await.total_requests += 1;
        match BoardRequest::decode(text) {
            Ok(request) => Self::handle_request(request, board.clone(), stats).await,
            Err(e) => {
                log::warn!("Unparseable request frame: {e}");
                stats.write().await.rejections += 1;
                let request_id = BoardRequest::salvage_request_id(text).unwrap_or_else(Uuid::nil);
                BoardResponse::error(request_id, e.to_string())
            }
        }
    }

    /// Run one request against the board on the blocking pool.
    async fn handle_request(
        request: BoardRequest,
        board: SharedBoard,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> BoardResponse {
        let request_id = request.request_id();
        match request {
            BoardRequest::Create {
                name,
                content,
                parent_id,
                ..
            } => {
                let result =
                    tokio::task::spawn_blocking(move || board.submit(name, content, parent_id)).await;
                let mut s = stats.write().await;
                match result {
                    Ok(Ok(message)) => {
                        s.submits += 1;
                        BoardResponse::message(request_id, message)
                    }
                    Ok(Err(e)) if e.is_rejection() => {
                        s.rejections += 1;
                        BoardResponse::error(request_id, e.to_string())
                    }
                    Ok(Err(e)) => {
                        log::error!("Submit {request_id} failed: {e}");
                        s.failures += 1;
                        BoardResponse::error(request_id, e.to_string())
                    }
                    Err(e) => {
                        log::error!("Submit {request_id} task failed: {e}");
                        s.failures += 1;
                        BoardResponse::error(request_id, "Internal server error")
                    }
                }
            }
            BoardRequest::Fetch { .. } => {
                let result = tokio::task::spawn_blocking(move || board.fetch()).await;
                let mut s = stats.write().await;
                match result {
                    Ok(Ok(document)) => {
                        s.fetches += 1;
                        BoardResponse::document(request_id, document)
                    }
                    Ok(Err(e)) => {
                        log::error!("Fetch {request_id} failed: {e}");
                        s.failures += 1;
                        BoardResponse::error(request_id, e.to_string())
                    }
                    Err(e) => {
                        log::error!("Fetch {request_id} task failed: {e}");
                        s.failures += 1;
                        BoardResponse::error(request_id, "Internal server error")
                    }
                }
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Get the served board.
    pub fn board(&self) -> &SharedBoard {
        &self.board
    }
}
