//! Packet definitions
//!
//! Binary packet protocol: every frame starts with a `u16` opcode that
//! selects one of the `Packet` variants. See `codec` for the byte layout.

use crate::error::CodecError;
use crate::types::RoomSummary;

/// Top-level frame opcode
///
/// `0` is deliberately unassigned so zero padding never parses as a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketOpcode {
    /// Reserved audio frame
    Sound = 1,
    /// Reserved end-of-stream marker
    End = 2,
    /// Room control request from a client
    Participant = 3,
    /// Acknowledgement of a participant request
    ParticipantAck = 4,
    /// Error report sent to a client
    Error = 5,
    /// Free-form debug text, relayed to the room
    Debug = 6,
}

impl TryFrom<u16> for PacketOpcode {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::Sound),
            2 => Ok(Self::End),
            3 => Ok(Self::Participant),
            4 => Ok(Self::ParticipantAck),
            5 => Ok(Self::Error),
            6 => Ok(Self::Debug),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Sub-opcode of a participant request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParticipantOpcode {
    CreateRoom = 1,
    ListRooms = 2,
    Join = 3,
    Leave = 4,
}

impl TryFrom<u8> for ParticipantOpcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::CreateRoom),
            2 => Ok(Self::ListRooms),
            3 => Ok(Self::Join),
            4 => Ok(Self::Leave),
            other => Err(CodecError::UnknownParticipantOpcode(other)),
        }
    }
}

/// Error kinds reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// JOIN referenced an unknown room name
    RoomNotFound = 1,
    /// JOIN on a room at capacity
    RoomFull = 2,
    /// CREATE_ROOM with a name already in use
    RoomExists = 3,
    /// Malformed request (missing or unparsable parameters)
    Undefined = 4,
}

impl TryFrom<u8> for ErrorKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::RoomNotFound),
            2 => Ok(Self::RoomFull),
            3 => Ok(Self::RoomExists),
            4 => Ok(Self::Undefined),
            other => Err(CodecError::UnknownErrorKind(other)),
        }
    }
}

/// A decoded protocol packet
///
/// Immutable value; owns no sockets or other resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Reserved: one chunk of an audio stream
    SoundFrame { sequence: u32, data: Vec<u8> },
    /// Reserved: end of an audio stream
    EndOfStream,
    /// Room control request
    ParticipantRequest {
        opcode: ParticipantOpcode,
        params: Vec<String>,
    },
    /// Successful reply to a participant request
    ParticipantAck {
        opcode: ParticipantOpcode,
        port: u16,
        rooms: Vec<RoomSummary>,
    },
    /// Failed reply to a participant request
    ErrorReport {
        kind: ErrorKind,
        detail: Option<String>,
    },
    /// Text relayed to every other member of the sender's room
    DebugMessage { message: String },
}

impl Packet {
    /// Opcode written at the start of this packet's frame
    pub fn opcode(&self) -> PacketOpcode {
        match self {
            Packet::SoundFrame { .. } => PacketOpcode::Sound,
            Packet::EndOfStream => PacketOpcode::End,
            Packet::ParticipantRequest { .. } => PacketOpcode::Participant,
            Packet::ParticipantAck { .. } => PacketOpcode::ParticipantAck,
            Packet::ErrorReport { .. } => PacketOpcode::Error,
            Packet::DebugMessage { .. } => PacketOpcode::Debug,
        }
    }

    /// Build an error report with a detail string
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Packet::ErrorReport {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// Build a participant request from string-like parameters
    pub fn request<S: Into<String>>(
        opcode: ParticipantOpcode,
        params: impl IntoIterator<Item = S>,
    ) -> Self {
        Packet::ParticipantRequest {
            opcode,
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}
