//! Broadcast fan-out
//!
//! Handlers talk to clients only through [`Outbox`]. [`RoomHub`] is the live
//! implementation: each connection owns an unbounded queue of encoded frames
//! drained by its writer task, so enqueueing never waits on the network.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::constants::room::GLOBAL_ROOM;
use crate::lobby::manager::{LobbyManager, ManagerError};
use crate::lobby::room::RoomInfo;
use crate::net::connection::ConnectionId;
use crate::net::protocol::{encode, ServerMessage};

/// One encoded message, shared between all recipients
pub type Frame = Arc<[u8]>;

/// Outbound delivery and room membership
pub trait Outbox: Send + Sync {
    /// Reply to one connection. Returns false if it is gone.
    fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool;

    /// Deliver to every member of a room, returns the number of recipients
    fn broadcast(&self, room: &str, message: &ServerMessage) -> usize;

    /// Deliver to every member of a room except one connection
    fn broadcast_except(&self, room: &str, except: ConnectionId, message: &ServerMessage) -> usize;

    fn create_room(&self, room: &str) -> Result<(), ManagerError>;

    fn join_room(&self, id: ConnectionId, room: &str) -> Result<(), ManagerError>;

    fn leave_room(&self, id: ConnectionId, room: &str) -> Result<(), ManagerError>;

    fn is_member(&self, id: ConnectionId, room: &str) -> bool;

    fn room_members(&self, room: &str) -> Vec<ConnectionId>;

    fn list_rooms(&self) -> Vec<RoomInfo>;
}

struct HubInner {
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>,
    lobby: LobbyManager,
}

/// Connection queues plus room membership
pub struct RoomHub {
    inner: Mutex<HubInner>,
}

impl RoomHub {
    pub fn new(max_rooms: usize) -> Self {
        let mut lobby = LobbyManager::new(max_rooms);
        lobby.ensure_permanent_room(GLOBAL_ROOM);
        Self {
            inner: Mutex::new(HubInner {
                senders: HashMap::new(),
                lobby,
            }),
        }
    }

    /// Open the outbound queue for a connection
    pub fn attach(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().senders.insert(id, tx);
        rx
    }

    /// Close the outbound queue and leave every room. Returns the rooms left.
    pub fn detach(&self, id: ConnectionId) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.senders.remove(&id);
        inner.lobby.leave_all(id)
    }

    pub fn is_attached(&self, id: ConnectionId) -> bool {
        self.inner.lock().senders.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().senders.len()
    }

    fn fan_out(&self, room: &str, except: Option<ConnectionId>, message: &ServerMessage) -> usize {
        let Some(frame) = encode_frame(message) else {
            return 0;
        };

        let inner = self.inner.lock();
        let mut delivered = 0;
        for member in inner.lobby.iter_members(room) {
            if Some(member) == except {
                continue;
            }
            if let Some(tx) = inner.senders.get(&member) {
                if tx.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(crate::game::constants::room::DEFAULT_MAX_ROOMS)
    }
}

fn encode_frame(message: &ServerMessage) -> Option<Frame> {
    match encode(message) {
        Ok(bytes) => Some(Frame::from(bytes)),
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            None
        }
    }
}

impl Outbox for RoomHub {
    fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(frame) = encode_frame(message) else {
            return false;
        };

        let inner = self.inner.lock();
        match inner.senders.get(&id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                debug!("Dropping reply to closed connection {}", id);
                false
            }
        }
    }

    fn broadcast(&self, room: &str, message: &ServerMessage) -> usize {
        self.fan_out(room, None, message)
    }

    fn broadcast_except(&self, room: &str, except: ConnectionId, message: &ServerMessage) -> usize {
        self.fan_out(room, Some(except), message)
    }

    fn create_room(&self, room: &str) -> Result<(), ManagerError> {
        self.inner.lock().lobby.create_room(room)
    }

    fn join_room(&self, id: ConnectionId, room: &str) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock();
        if !inner.senders.contains_key(&id) {
            return Err(ManagerError::NotConnected);
        }
        inner.lobby.join_room(id, room)
    }

    fn leave_room(&self, id: ConnectionId, room: &str) -> Result<(), ManagerError> {
        self.inner.lock().lobby.leave_room(id, room)
    }

    fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.inner.lock().lobby.is_member(id, room)
    }

    fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.inner.lock().lobby.members(room)
    }

    fn list_rooms(&self) -> Vec<RoomInfo> {
        self.inner.lock().lobby.list_rooms()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Drain every queued frame as decoded server messages
    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(serde_json::from_slice(&frame).unwrap());
        }
        messages
    }

    fn removal(id: ConnectionId) -> ServerMessage {
        ServerMessage::RemovePlayer { id }
    }

    #[test]
    fn test_send_to_single_connection() {
        let hub = RoomHub::new(10);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.attach(a);
        let mut rx_b = hub.attach(b);

        assert!(hub.send_to(a, &removal(b)));

        assert_eq!(drain(&mut rx_a), vec![removal(b)]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_broadcast_reaches_room_members_only() {
        let hub = RoomHub::new(10);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let outsider = ConnectionId::new();
        let mut rx_a = hub.attach(a);
        let mut rx_b = hub.attach(b);
        let mut rx_out = hub.attach(outsider);
        hub.join_room(a, GLOBAL_ROOM).unwrap();
        hub.join_room(b, GLOBAL_ROOM).unwrap();

        assert_eq!(hub.broadcast(GLOBAL_ROOM, &removal(outsider)), 2);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_out).is_empty());
    }

    #[test]
    fn test_broadcast_except_skips_sender() {
        let hub = RoomHub::new(10);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.attach(a);
        let mut rx_b = hub.attach(b);
        hub.join_room(a, GLOBAL_ROOM).unwrap();
        hub.join_room(b, GLOBAL_ROOM).unwrap();

        assert_eq!(hub.broadcast_except(GLOBAL_ROOM, a, &removal(a)), 1);

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![removal(a)]);
    }

    #[test]
    fn test_fan_out_covers_whole_room() {
        let hub = RoomHub::new(10);
        let ids: Vec<ConnectionId> = (0..50).map(|_| ConnectionId::new()).collect();
        let mut receivers: Vec<_> = ids.iter().map(|id| hub.attach(*id)).collect();
        for id in &ids {
            hub.join_room(*id, GLOBAL_ROOM).unwrap();
        }

        assert_eq!(hub.broadcast_except(GLOBAL_ROOM, ids[7], &removal(ids[7])), 49);

        for (i, rx) in receivers.iter_mut().enumerate() {
            let expected = if i == 7 { 0 } else { 1 };
            assert_eq!(drain(rx).len(), expected);
        }
    }

    #[test]
    fn test_detach_leaves_rooms_and_closes_queue() {
        let hub = RoomHub::new(10);
        let a = ConnectionId::new();
        let mut rx_a = hub.attach(a);
        hub.join_room(a, GLOBAL_ROOM).unwrap();

        assert_eq!(hub.detach(a), vec![GLOBAL_ROOM.to_string()]);

        assert!(!hub.send_to(a, &removal(a)));
        assert_eq!(hub.broadcast(GLOBAL_ROOM, &removal(a)), 0);
        assert!(hub.room_members(GLOBAL_ROOM).is_empty());
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_join_requires_attached_connection() {
        let hub = RoomHub::new(10);
        let result = hub.join_room(ConnectionId::new(), GLOBAL_ROOM);
        assert!(matches!(result, Err(ManagerError::NotConnected)));
    }

    #[test]
    fn test_lobby_rooms_are_separate_scopes() {
        let hub = RoomHub::new(10);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.attach(a);
        let mut rx_b = hub.attach(b);
        hub.join_room(a, GLOBAL_ROOM).unwrap();
        hub.join_room(b, GLOBAL_ROOM).unwrap();
        hub.create_room("den").unwrap();
        hub.join_room(a, "den").unwrap();

        hub.broadcast("den", &removal(b));

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());

        hub.leave_room(a, "den").unwrap();
        assert!(hub.list_rooms().iter().all(|r| r.name != "den"));
    }
}
