//! Client handle definition
//!
//! The capability other components use to reach a connection: deliver a
//! packet to its writer task, or ask it to close.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::packet::Packet;

/// Handle to a live client connection
///
/// Cheap to clone. Held by the registry (one per port) and by every room
/// the connection has joined.
#[derive(Debug, Clone)]
pub struct Client {
    /// Assigned connection port, unique among live clients
    port: u16,
    /// Server → Client packet channel, drained by the connection's writer task
    sender: mpsc::Sender<Packet>,
    /// Wakes the connection so it tears itself down
    closer: Arc<Notify>,
}

impl Client {
    /// Create a new handle for the given port and sender channel
    pub fn new(port: u16, sender: mpsc::Sender<Packet>) -> Self {
        Self {
            port,
            sender,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue a packet for this client
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, packet: Packet) -> Result<(), SendError> {
        self.sender
            .send(packet)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a packet without waiting for room in the channel
    ///
    /// Fails with `QueueFull` if the client is not keeping up.
    pub fn try_send(&self, packet: Packet) -> Result<(), SendError> {
        self.sender.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Ask the connection to close its socket
    ///
    /// The request is remembered if the connection is not waiting yet.
    pub fn close(&self) {
        self.closer.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.closer.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::packet::ErrorKind;

    #[tokio::test]
    async fn test_client_send() {
        let (tx, mut rx) = mpsc::channel(32);
        let client = Client::new(5000, tx);

        client
            .send(Packet::error(ErrorKind::RoomFull, "full"))
            .await
            .unwrap();

        assert_eq!(client.port(), 5000);
        assert_eq!(rx.recv().await, Some(Packet::error(ErrorKind::RoomFull, "full")));
    }

    #[tokio::test]
    async fn test_client_send_after_disconnect() {
        let (tx, rx) = mpsc::channel(32);
        let client = Client::new(5000, tx);
        drop(rx);

        assert!(client.send(Packet::EndOfStream).await.is_err());
    }

    #[test]
    fn test_try_send_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let client = Client::new(5000, tx);

        client.try_send(Packet::EndOfStream).unwrap();
        assert!(matches!(
            client.try_send(Packet::EndOfStream),
            Err(SendError::QueueFull)
        ));

        assert_eq!(rx.try_recv(), Ok(Packet::EndOfStream));
        drop(rx);
        assert!(matches!(
            client.try_send(Packet::EndOfStream),
            Err(SendError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_before_wait_is_remembered() {
        let (tx, _rx) = mpsc::channel(32);
        let client = Client::new(5000, tx);

        client.clone().close();

        tokio::time::timeout(Duration::from_secs(1), client.closed())
            .await
            .expect("close request was lost");
    }
}
