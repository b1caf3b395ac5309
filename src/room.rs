//! Chatroom definition
//!
//! A named, capacity-bounded broadcast group keyed by member port.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::client::Client;
use crate::packet::Packet;
use crate::types::{RoomId, RoomSummary};

/// Longest room name, in bytes, a client may create
pub const MAX_ROOM_NAME_LEN: usize = 255;

/// Reasons a join can be refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The room already holds `max_capacity` members
    #[error("Room is full")]
    Full,
    /// The port is already a member
    #[error("Already a member")]
    AlreadyMember,
}

/// A room with this name is already live
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Chatroom name: {0} already exists.")]
pub struct RoomExists(pub String);

/// Chat room
///
/// Name and capacity are fixed at creation. Membership is guarded by a
/// single mutex so the capacity check and the insert are one step.
#[derive(Debug)]
pub struct Chatroom {
    id: RoomId,
    name: String,
    max_capacity: u32,
    members: Mutex<HashMap<u16, Client>>,
}

impl Chatroom {
    /// Create an empty room
    pub fn new(name: String, max_capacity: u32) -> Self {
        Self {
            id: RoomId::new(),
            name,
            max_capacity,
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    /// Number of current members
    pub fn size(&self) -> u32 {
        self.lock_members().len() as u32
    }

    /// Add a member
    ///
    /// Refuses when the room is at capacity at the instant of the check.
    pub fn join(&self, client: Client) -> Result<(), JoinError> {
        let mut members = self.lock_members();

        if members.contains_key(&client.port()) {
            return Err(JoinError::AlreadyMember);
        }
        if members.len() as u32 >= self.max_capacity {
            return Err(JoinError::Full);
        }

        members.insert(client.port(), client);
        Ok(())
    }

    /// Remove a member; leaving a room you are not in does nothing
    ///
    /// Returns true if the port was a member.
    pub fn leave(&self, port: u16) -> bool {
        self.lock_members().remove(&port).is_some()
    }

    /// Send `packet` to every member except `excluding_port`
    ///
    /// Never waits on a member's queue: a member that is gone or whose queue
    /// is full is logged and skipped. Returns how many members the packet
    /// reached.
    pub fn broadcast(&self, packet: &Packet, excluding_port: u16) -> usize {
        let recipients: Vec<Client> = self
            .lock_members()
            .values()
            .filter(|client| client.port() != excluding_port)
            .cloned()
            .collect();

        let mut delivered = 0;
        for client in recipients {
            match client.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Broadcast in room {} to port {} failed: {}",
                    self.name,
                    client.port(),
                    e
                ),
            }
        }

        debug!(
            "Room {} broadcast from port {} reached {} member(s)",
            self.name, excluding_port, delivered
        );
        delivered
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.name.clone(),
            size: self.size(),
            max_capacity: self.max_capacity,
        }
    }

    /// Member ports in ascending order
    pub fn members(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.lock_members().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    // Membership stays consistent even if a holder panicked, so poisoning is ignored.
    fn lock_members(&self) -> MutexGuard<'_, HashMap<u16, Client>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
