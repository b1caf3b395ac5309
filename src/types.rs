//! Basic type definitions for the voice chat server
//!
//! Provides:
//! - `RoomId`: UUID-based opaque key for the room registry
//! - `RoomSummary`: the `name;size/capacity` description sent in acks

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::CodecError;

/// Opaque room identifier (newtype pattern)
///
/// Rooms are looked up by name from the protocol, but stored under an id
/// so that a name is never used as a map key directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Create a new random room ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time description of a room
///
/// Rendered on the wire as `"<name>;<size>/<max_capacity>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub name: String,
    pub size: u32,
    pub max_capacity: u32,
}

impl fmt::Display for RoomSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}/{}", self.name, self.size, self.max_capacity)
    }
}

impl FromStr for RoomSummary {
    type Err = CodecError;

    /// Splits on the last `;`, so a room name may itself contain `;`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidSummary(s.to_string());

        let (name, counts) = s.rsplit_once(';').ok_or_else(invalid)?;
        let (size, max_capacity) = counts.split_once('/').ok_or_else(invalid)?;

        Ok(Self {
            name: name.to_string(),
            size: size.parse().map_err(|_| invalid())?,
            max_capacity: max_capacity.parse().map_err(|_| invalid())?,
        })
    }
}
