//! Per-client connection actor
//!
//! Accepts the client's stream on its dedicated port, splits it into a
//! read loop and a writer task, and dispatches every decoded packet on its
//! own task. Tracks which room (if any) the client is in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::codec::{self, MAX_FRAME_SIZE};
use crate::packet::{ErrorKind, Packet, ParticipantOpcode};
use crate::room::{Chatroom, JoinError, MAX_ROOM_NAME_LEN};
use crate::server::Server;
use crate::types::RoomSummary;

/// Outbound packet queue depth per client
pub const OUTBOUND_BUFFER: usize = 32;

/// Packets from one client that may be handled at the same time
pub const MAX_IN_FLIGHT: usize = 16;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Port assigned, waiting for the client to connect to it
    Bootstrapping,
    /// Connected, not in any room
    Idle,
    /// Member of exactly one room
    InRoom,
    /// Stream closed; terminal
    Closed,
}

#[derive(Debug)]
enum Phase {
    Bootstrapping,
    Idle,
    InRoom(Weak<Chatroom>),
    Closed,
}

/// One client's session
pub struct Connection {
    client: Client,
    server: Arc<Server>,
    phase: Mutex<Phase>,
}

impl Connection {
    pub fn new(client: Client, server: Arc<Server>) -> Self {
        Self {
            client,
            server,
            phase: Mutex::new(Phase::Bootstrapping),
        }
    }

    pub fn port(&self) -> u16 {
        self.client.port()
    }

    /// Current state; a room that no longer exists counts as idle
    pub fn state(&self) -> ConnectionState {
        match &*self.lock_phase() {
            Phase::Bootstrapping => ConnectionState::Bootstrapping,
            Phase::Idle => ConnectionState::Idle,
            Phase::InRoom(room) if room.strong_count() > 0 => ConnectionState::InRoom,
            Phase::InRoom(_) => ConnectionState::Idle,
            Phase::Closed => ConnectionState::Closed,
        }
    }

    /// Serve the client until it disconnects or the server closes it
    ///
    /// `outbound` is the receiving end of the channel behind `self.client`.
    pub async fn run(self: Arc<Self>, listener: TcpListener, outbound: mpsc::Receiver<Packet>) {
        let port = self.port();

        let accepted = tokio::select! {
            _ = self.client.closed() => None,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Client {} connected on port {}", addr, port);
                    Some(stream)
                }
                Err(e) => {
                    warn!("Accept on port {} failed: {}", port, e);
                    None
                }
            },
        };
        drop(listener);

        let Some(stream) = accepted else {
            self.close();
            return;
        };

        self.transition(Phase::Idle);

        let (read_half, write_half) = stream.into_split();
        let write_task = tokio::spawn(write_loop(port, write_half, outbound));

        self.read_loop(read_half).await;

        self.close();
        write_task.abort();

        info!("Client on port {} has disconnected", port);
    }

    /// Read frames in order and hand each one to its own task
    async fn read_loop(self: &Arc<Self>, mut reader: OwnedReadHalf) {
        let port = self.port();
        let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);

        loop {
            buf.reserve(MAX_FRAME_SIZE);
            let read = tokio::select! {
                _ = self.client.closed() => {
                    debug!("Port {} closed by server", port);
                    return;
                }
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Read error on port {}: {}", port, e);
                    return;
                }
            }

            loop {
                match codec::take_frame(&mut buf) {
                    Ok(Some(packet)) => {
                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            return;
                        };
                        let connection = Arc::clone(self);
                        tokio::spawn(async move {
                            connection.dispatch(packet).await;
                            drop(permit);
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Dropped unparsable data from port {}: {}", port, e);
                        break;
                    }
                }
            }
        }
    }

    /// Handle one decoded packet
    pub async fn dispatch(&self, packet: Packet) {
        let reply = match packet {
            Packet::ParticipantRequest { opcode, params } => match opcode {
                ParticipantOpcode::CreateRoom => Some(self.create_room(&params)),
                ParticipantOpcode::ListRooms => Some(self.list_rooms()),
                ParticipantOpcode::Join => self.join_room(&params),
                ParticipantOpcode::Leave => self.leave_room(),
            },
            broadcast @ Packet::DebugMessage { .. } => {
                self.relay(broadcast);
                None
            }
            Packet::SoundFrame { .. } | Packet::EndOfStream => {
                debug!("Ignoring sound packet from port {}", self.port());
                None
            }
            other @ (Packet::ParticipantAck { .. } | Packet::ErrorReport { .. }) => {
                debug!("Ignoring {:?} sent by port {}", other.opcode(), self.port());
                None
            }
        };

        if let Some(reply) = reply {
            self.reply(reply).await;
        }
    }

    fn create_room(&self, params: &[String]) -> Packet {
        let Some(name) = params.first().filter(|name| !name.is_empty()) else {
            return Packet::error(ErrorKind::Undefined, "No parameters specified in the packet.");
        };
        if name.len() > MAX_ROOM_NAME_LEN {
            return Packet::error(
                ErrorKind::Undefined,
                format!("Chatroom name is longer than {} bytes.", MAX_ROOM_NAME_LEN),
            );
        }
        let Some(capacity) = params.get(1) else {
            return Packet::error(
                ErrorKind::Undefined,
                "No parameter specifying the number of participants.",
            );
        };
        let max_capacity = match capacity.trim().parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Packet::error(
                    ErrorKind::Undefined,
                    format!("Number of participants {:?} is not a positive integer.", capacity),
                )
            }
        };

        match self.server.create_room(name, max_capacity) {
            Ok(_) => self.ack(ParticipantOpcode::CreateRoom, Vec::new()),
            Err(e) => Packet::error(ErrorKind::RoomExists, e.to_string()),
        }
    }

    /// Every room, cut short if the ack would outgrow one frame
    fn list_rooms(&self) -> Packet {
        let mut rooms = self.server.list_room_summaries();
        let fitting = codec::rooms_fitting_frame(&rooms);
        if fitting < rooms.len() {
            debug!(
                "Listing {} of {} rooms to port {}",
                fitting,
                rooms.len(),
                self.port()
            );
            rooms.truncate(fitting);
        }
        self.ack(ParticipantOpcode::ListRooms, rooms)
    }

    /// Join a room by name; a second join while in a room does nothing
    fn join_room(&self, params: &[String]) -> Option<Packet> {
        let port = self.port();
        let mut phase = self.lock_phase();

        match &*phase {
            Phase::Idle => {}
            Phase::InRoom(room) if room.strong_count() > 0 => {
                debug!("Port {} is already in a room, ignoring join", port);
                return None;
            }
            Phase::InRoom(_) => {}
            Phase::Bootstrapping | Phase::Closed => return None,
        }

        let Some(name) = params.first().filter(|name| !name.is_empty()) else {
            return Some(Packet::error(ErrorKind::Undefined, "No chatroom name specified."));
        };
        let Some(room) = self.server.find_room_by_name(name) else {
            return Some(Packet::error(
                ErrorKind::RoomNotFound,
                format!("Chatroom {} does not exist.", name),
            ));
        };

        match room.join(self.client.clone()) {
            Ok(()) => {
                *phase = Phase::InRoom(Arc::downgrade(&room));
                info!("Port {} has joined chatroom {}", port, room.name());
                Some(self.ack(ParticipantOpcode::Join, vec![room.summary()]))
            }
            Err(JoinError::Full) => Some(Packet::error(
                ErrorKind::RoomFull,
                format!("Chatroom {} is full.", room.name()),
            )),
            Err(JoinError::AlreadyMember) => None,
        }
    }

    /// Leave the current room; leaving while idle does nothing
    fn leave_room(&self) -> Option<Packet> {
        let mut phase = self.lock_phase();

        let Phase::InRoom(room) = &*phase else {
            return None;
        };
        let room = room.upgrade();
        *phase = Phase::Idle;

        let room = room?;
        room.leave(self.port());
        info!("Port {} has left chatroom {}", self.port(), room.name());
        Some(self.ack(ParticipantOpcode::Leave, Vec::new()))
    }

    /// Forward a broadcastable packet to the rest of the room
    fn relay(&self, packet: Packet) {
        if let Packet::DebugMessage { message } = &packet {
            info!("Debug message from port {}: {}", self.port(), message);
        }

        match self.current_room() {
            Some(room) => {
                room.broadcast(&packet, self.port());
            }
            None => debug!("Port {} is not in a room, dropping broadcast", self.port()),
        }
    }

    fn current_room(&self) -> Option<Arc<Chatroom>> {
        match &*self.lock_phase() {
            Phase::InRoom(room) => room.upgrade(),
            _ => None,
        }
    }

    fn ack(&self, opcode: ParticipantOpcode, rooms: Vec<RoomSummary>) -> Packet {
        Packet::ParticipantAck {
            opcode,
            port: self.port(),
            rooms,
        }
    }

    async fn reply(&self, packet: Packet) {
        if let Err(e) = self.client.send(packet).await {
            warn!("Reply to port {} failed: {}", self.port(), e);
        }
    }

    fn transition(&self, next: Phase) {
        *self.lock_phase() = next;
    }

    /// Enter the terminal state, leave any room and release the port
    fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_phase(), Phase::Closed);

        if let Phase::InRoom(room) = previous {
            if let Some(room) = room.upgrade() {
                room.leave(self.port());
                info!("Port {} has left chatroom {}", self.port(), room.name());
            }
        }

        self.server.remove_connection(self.port());
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drain the outbound queue onto the socket
async fn write_loop(port: u16, mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Packet>) {
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = writer.write_all(&codec::encode(&packet)).await {
            warn!("Write to port {} failed: {}", port, e);
            break;
        }
    }
    debug!("Write task ended for port {}", port);
}
