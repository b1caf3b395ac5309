//! Voice Chat Relay Server Library
//!
//! A chatroom relay server over plain TCP with a compact binary protocol.
//!
//! # Features
//! - Bootstrap handshake that hands every client its own port
//! - Port reuse that keeps the live port range compact
//! - Room creation, listing, joining and leaving by name
//! - Capacity-bounded rooms
//! - Debug messages relayed to the rest of the room
//! - Operator commands to dump or clear rooms
//!
//! # Architecture
//! - `Server` is the registry: concurrent maps of live connections (by port)
//!   and live rooms, shared as `Arc<Server>`
//! - Each client is served by a `Connection` actor listening on its own port,
//!   with a read loop, a writer task, and one short task per decoded packet
//! - `Chatroom` guards its membership with a mutex so joins never exceed
//!   capacity
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use voicechat_server::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().unwrap();
//!     let server = Server::bind(&config).await.unwrap();
//!     Arc::clone(&server).run().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod packet;
pub mod ports;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use codec::{decode, encode};
pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{AppError, CodecError, ConfigError, SendError};
pub use packet::{ErrorKind, Packet, PacketOpcode, ParticipantOpcode};
pub use ports::PortAllocator;
pub use room::{Chatroom, JoinError, RoomExists};
pub use server::{RoomSnapshot, Server};
pub use types::{RoomId, RoomSummary};
