//! Server registry implementation
//!
//! Owns the public bootstrap listener, the map of live connections keyed by
//! port and the map of live rooms. One `Arc<Server>` is shared by the
//! accept loop and every connection actor.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::Config;
use crate::connection::{Connection, OUTBOUND_BUFFER};
use crate::error::AppError;
use crate::packet::Packet;
use crate::ports::PortAllocator;
use crate::room::{Chatroom, RoomExists};
use crate::types::{RoomId, RoomSummary};

/// A room and the ports currently in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub summary: RoomSummary,
    pub members: Vec<u16>,
}

/// The connection and room registry
pub struct Server {
    /// Public bootstrap listener
    listener: TcpListener,
    /// Interface per-client listeners bind to
    host: String,
    /// All live connections: port -> Client
    connections: DashMap<u16, Client>,
    /// All live rooms: RoomId -> Chatroom
    rooms: DashMap<RoomId, Arc<Chatroom>>,
    /// Serialises room creation and clearing so names stay unique
    room_lock: Mutex<()>,
    /// Held while a port is chosen and recorded in `connections`
    ports: Mutex<PortAllocator>,
    /// Stops the accept loop
    shutdown: Notify,
}

impl Server {
    /// Bind the public listener
    ///
    /// Failing to bind is fatal for the process; the caller should exit.
    pub async fn bind(config: &Config) -> Result<Arc<Self>, AppError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;

        Ok(Arc::new(Self {
            listener,
            host: config.host.clone(),
            connections: DashMap::new(),
            rooms: DashMap::new(),
            room_lock: Mutex::new(()),
            ports: Mutex::new(PortAllocator::new(config.connection_starting_port)),
            shutdown: Notify::new(),
        }))
    }

    /// Address the public listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the bootstrap accept loop until `shutdown` is called
    pub async fn run(self: Arc<Self>) {
        info!("Accepting bootstrap connections");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!("Bootstrap connection from {}", addr);
                    if let Err(e) = self.bootstrap(stream).await {
                        warn!("Bootstrap for {} failed: {}", addr, e);
                    }
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("Accept loop stopped");
    }

    /// Give one client its own port and start its connection actor
    ///
    /// The client reads the port as a decimal line, then reconnects to it.
    async fn bootstrap(self: &Arc<Self>, mut stream: TcpStream) -> Result<u16, AppError> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let client = self.register(tx)?;
        let port = client.port();

        let listener = match TcpListener::bind((self.host.as_str(), port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.remove_connection(port);
                return Err(e.into());
            }
        };

        let reply = format!("{}\n", port);
        if let Err(e) = stream.write_all(reply.as_bytes()).await {
            self.remove_connection(port);
            return Err(e.into());
        }
        let _ = stream.shutdown().await;

        info!("New connection on port {}", port);

        let connection = Arc::new(Connection::new(client, Arc::clone(self)));
        tokio::spawn(connection.run(listener, rx));

        Ok(port)
    }

    /// Allocate a port and record the connection under it
    fn register(&self, sender: mpsc::Sender<Packet>) -> Result<Client, AppError> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);

        let assigned: Vec<u16> = self.connections.iter().map(|entry| *entry.key()).collect();
        let port = ports.allocate(&assigned)?;

        let client = Client::new(port, sender);
        self.connections.insert(port, client.clone());
        Ok(client)
    }

    /// Close a connection and release its port
    ///
    /// Safe to call more than once. Returns true if the port was live.
    pub fn remove_connection(&self, port: u16) -> bool {
        match self.connections.remove(&port) {
            Some((_, client)) => {
                client.close();
                debug!(
                    "Released port {} ({} connection(s) left)",
                    port,
                    self.connections.len()
                );
                true
            }
            None => false,
        }
    }

    /// Create a room unless one with the same name already exists
    ///
    /// The name check and the insert happen under one lock.
    pub fn create_room(&self, name: &str, max_capacity: u32) -> Result<Arc<Chatroom>, RoomExists> {
        let _guard = self.lock_rooms();

        if self.find_room_by_name(name).is_some() {
            warn!("Chatroom {} already exists", name);
            return Err(RoomExists(name.to_string()));
        }

        let room = Arc::new(Chatroom::new(name.to_string(), max_capacity));
        self.rooms.insert(room.id(), Arc::clone(&room));

        info!("Chatroom created: {} (capacity {})", name, max_capacity);
        Ok(room)
    }

    pub fn find_room_by_name(&self, name: &str) -> Option<Arc<Chatroom>> {
        self.rooms
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Summaries of every live room, ordered by name
    pub fn list_room_summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> =
            self.rooms.iter().map(|entry| entry.value().summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Every room with its member ports, ordered by name
    pub fn room_snapshots(&self) -> Vec<RoomSnapshot> {
        let mut snapshots: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|entry| RoomSnapshot {
                summary: entry.value().summary(),
                members: entry.value().members(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.summary.name.cmp(&b.summary.name));
        snapshots
    }

    /// Drop every room
    ///
    /// Connections only hold weak references, so members fall back to idle.
    pub fn clear_rooms(&self) -> usize {
        let _guard = self.lock_rooms();
        let count = self.rooms.len();
        self.rooms.clear();
        info!("Cleared {} chatroom(s)", count);
        count
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Ports of every live connection, ascending
    pub fn connection_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.connections.iter().map(|entry| *entry.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Stop accepting and close every live connection
    pub fn shutdown(&self) {
        self.shutdown.notify_one();

        for port in self.connection_ports() {
            self.remove_connection(port);
        }
        info!("Server shut down");
    }

    fn lock_rooms(&self) -> MutexGuard<'_, ()> {
        self.room_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_server(starting_port: u16) -> Arc<Server> {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            connection_starting_port: starting_port,
        };
        Server::bind(&config).await.unwrap()
    }

    fn register(server: &Server) -> (u16, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let client = server.register(tx).unwrap();
        (client.port(), rx)
    }

    #[tokio::test]
    async fn test_create_and_find_room() {
        let server = test_server(41000).await;

        let room = server.create_room("lobby", 2).unwrap();
        assert_eq!(room.name(), "lobby");

        let found = server.find_room_by_name("lobby").unwrap();
        assert_eq!(found.id(), room.id());
        assert!(server.find_room_by_name("nope").is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let server = test_server(41000).await;

        server.create_room("lobby", 2).unwrap();
        let err = server.create_room("lobby", 5).unwrap_err();

        assert_eq!(err, RoomExists("lobby".to_string()));
        assert_eq!(server.room_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_same_name() {
        let server = test_server(41000).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.create_room("race", 3).is_ok() })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(server.room_count(), 1);
    }

    #[tokio::test]
    async fn test_list_room_summaries() {
        let server = test_server(41000).await;
        server.create_room("b", 4).unwrap();
        server.create_room("a", 2).unwrap();

        let names: Vec<String> = server
            .list_room_summaries()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["a;0/2", "b;0/4"]);
    }

    #[tokio::test]
    async fn test_register_reuses_released_port() {
        let server = test_server(41100).await;

        let ports: Vec<u16> = (0..4).map(|_| register(&server).0).collect();
        assert_eq!(ports, vec![41100, 41101, 41102, 41103]);

        // leave {41100, 41101, 41103}, then drop 41101
        assert!(server.remove_connection(41102));
        let (next, _rx) = register(&server);
        assert_eq!(next, 41102);

        server.remove_connection(41101);
        let (reused, _rx) = register(&server);
        assert_eq!(reused, 41101);
        assert_eq!(server.connection_count(), 4);
    }

    #[tokio::test]
    async fn test_remove_connection_is_idempotent() {
        let server = test_server(41200).await;
        let (port, _rx) = register(&server);

        assert!(server.remove_connection(port));
        assert!(!server.remove_connection(port));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_rooms() {
        let server = test_server(41000).await;
        let room = server.create_room("lobby", 2).unwrap();
        let weak = Arc::downgrade(&room);
        drop(room);

        assert_eq!(server.clear_rooms(), 1);
        assert_eq!(server.room_count(), 0);
        assert!(weak.upgrade().is_none());

        // the name is free again
        assert!(server.create_room("lobby", 2).is_ok());
    }

    #[tokio::test]
    async fn test_room_snapshots() {
        let server = test_server(41000).await;
        let room = server.create_room("lobby", 3).unwrap();
        let (tx, _rx) = mpsc::channel(OUTBOUND_BUFFER);
        room.join(Client::new(41007, tx)).unwrap();

        let snapshots = server.room_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].summary.to_string(), "lobby;1/3");
        assert_eq!(snapshots[0].members, vec![41007]);
    }
}
