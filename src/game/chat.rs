use std::sync::Arc;

use tracing::{debug, warn};

use crate::game::constants::chat::MAX_MESSAGE_LEN;
use crate::game::constants::room::GLOBAL_ROOM;
use crate::game::state::SessionStore;
use crate::net::connection::ConnectionId;
use crate::net::hub::Outbox;
use crate::net::protocol::ServerMessage;
use crate::util::clock::unix_millis;

/// Relays chat lines to a room, sender included
pub struct ChatEventHandler {
    store: Arc<SessionStore>,
    outbox: Arc<dyn Outbox>,
}

impl ChatEventHandler {
    pub fn new(store: Arc<SessionStore>, outbox: Arc<dyn Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Returns the number of recipients, zero if the message was dropped
    pub fn send_chat_message(&self, conn: ConnectionId, text: &str, room: Option<&str>) -> usize {
        let Some(pseudo) = self.store.pseudo_of(conn) else {
            warn!("Chat from unjoined connection {} dropped", conn);
            return 0;
        };

        let message: String = text.trim().chars().take(MAX_MESSAGE_LEN).collect();
        let message = message.trim_end().to_string();
        if message.is_empty() {
            debug!("Empty chat message from {} dropped", conn);
            return 0;
        }

        let room = room.unwrap_or(GLOBAL_ROOM);
        if !self.outbox.is_member(conn, room) {
            warn!("Chat from {} to room '{}' it has not joined", conn, room);
            return 0;
        }

        self.outbox.broadcast(
            room,
            &ServerMessage::ChatMessage {
                id: conn,
                pseudo,
                message,
                time: unix_millis(),
            },
        )
    }
}
