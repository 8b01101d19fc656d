//! # threadline-board — storage, service and transport for Threadline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ BoardClient │ ◄─────────────────► │ BoardServer │
//! │             │    JSON frames      │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │ spawn_blocking
//!                                     ┌──────▼──────┐
//!                                     │MessageBoard │  submit / fetch
//!                                     └──────┬──────┘
//!                                            │ exclusive + load/save
//!                                     ┌──────▼──────┐
//!                                     │ dyn Store   │  file | rocks | memory
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`] — `Store` trait and its backends
//! - [`board`] — `MessageBoard`, the submit/fetch service
//! - [`protocol`] — JSON request/response frames
//! - [`server`] — WebSocket server and its configuration
//! - [`client`] — WebSocket client

pub mod board;
pub mod client;
pub mod protocol;
pub mod server;
pub mod storage;

pub use board::{BoardError, MessageBoard};
pub use client::{BoardClient, ConnectionState, DEFAULT_REQUEST_TIMEOUT};
pub use protocol::{BoardRequest, BoardResponse, ProtocolError, ResponseBody};
pub use server::{BoardServer, ServerConfig, ServerError, ServerStats, SharedBoard, StorageBackend};
pub use storage::{
    BoardMetadata, CorruptionPolicy, ExclusiveGuard, FileStore, FileStoreConfig, MemoryStore,
    RocksStore, RocksStoreConfig, Store, StoreError,
};
