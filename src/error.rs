//! Error types for the voice chat server
//!
//! Defines application-level errors, packet delivery errors and
//! codec errors. Uses thiserror for ergonomic error definitions.

use std::str::Utf8Error;

use thiserror::Error;

/// Application-level errors
///
/// These never reach a client directly. Client-visible failures are
/// reported with an `ErrorReport` packet instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (bind, accept, socket read/write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The connection port counter ran past the end of the port range
    #[error("No connection ports left (next would be {0})")]
    PortsExhausted(u32),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but is not a valid port number
    #[error("{name} is not a valid port: {value:?}")]
    InvalidPort { name: &'static str, value: String },

    /// The connection ports would overlap the public server port
    #[error("CONNECTION_STARTING_PORT ({starting}) must be greater than SERVER_PORT ({server})")]
    PortOverlap { server: u16, starting: u16 },
}

/// Packet send errors
///
/// Occurs when attempting to deliver to a connection whose writer has gone
/// away, or one that has stopped draining its queue.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound queue is at capacity
    #[error("Outbound queue full")]
    QueueFull,
}

/// Wire codec errors
///
/// `Incomplete` means more bytes may still arrive; every other variant
/// means the buffered data cannot be parsed and should be dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Incomplete frame: needed {needed} bytes, had {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("Unknown participant opcode: {0}")]
    UnknownParticipantOpcode(u8),

    #[error("Unknown error kind: {0}")]
    UnknownErrorKind(u8),

    #[error("Invalid UTF-8 string: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("Invalid room summary: {0:?}")]
    InvalidSummary(String),

    #[error("Invalid flag byte: {0}")]
    InvalidFlag(u8),
}
