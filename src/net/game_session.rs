//! Session wiring - one place that owns the shared state and routes intents

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[cfg(feature = "lobby")]
use crate::game::constants::room::GLOBAL_ROOM;
use crate::game::chat::ChatEventHandler;
use crate::game::handler::GameEventHandler;
use crate::game::state::SessionStore;
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, RegistryError};
use crate::net::hub::{Frame, Outbox, RoomHub};
use crate::net::protocol::{decode, ClientMessage, ServerMessage};
use crate::util::clock::unix_millis;

/// Shared server state plus the handlers that act on it
pub struct GameSession {
    store: Arc<SessionStore>,
    hub: Arc<RoomHub>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    game: GameEventHandler,
    chat: ChatEventHandler,
}

impl GameSession {
    pub fn new(
        store: Arc<SessionStore>,
        hub: Arc<RoomHub>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let outbox: Arc<dyn Outbox> = hub.clone();
        Self {
            game: GameEventHandler::new(store.clone(), outbox.clone()),
            chat: ChatEventHandler::new(store.clone(), outbox),
            store,
            hub,
            registry,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Admit a new connection and open its outbound queue
    pub fn connect(
        &self,
        remote_addr: Option<std::net::SocketAddr>,
    ) -> Result<(ConnectionHandle, UnboundedReceiver<Frame>), RegistryError> {
        let handle = match self.registry.on_connect(remote_addr) {
            Ok(handle) => handle,
            Err(e) => {
                self.metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        let outbound = self.hub.attach(handle.id);
        self.metrics.connection_opened();
        debug!("Connection {} opened from {:?}", handle.id, remote_addr);
        Ok((handle, outbound))
    }

    /// Decode and act on one inbound frame. Malformed frames are dropped.
    pub fn handle_frame(&self, conn: ConnectionId, data: &[u8]) {
        if !self.registry.record_received(conn, data.len()) {
            debug!("Frame for closed connection {} ignored", conn);
            return;
        }
        self.metrics.record_received(data.len());

        match decode(data) {
            Ok(message) => {
                debug!("{} from {}", message.event(), conn);
                self.dispatch(conn, message);
            }
            Err(e) => {
                self.metrics.record_dropped();
                warn!("Dropping frame from {}: {}", conn, e);
            }
        }
    }

    /// Route a decoded intent to its handler
    pub fn dispatch(&self, conn: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::JoinGame { pseudo } => {
                self.game.join_game(conn, &pseudo);
                self.metrics.update_store(self.store.stats());
            }
            ClientMessage::PlayerReady => {
                self.game.player_ready(conn);
                self.metrics.update_store(self.store.stats());
            }
            ClientMessage::PlayerMove(position) => self.game.player_move(conn, position),
            ClientMessage::GetPlayersList => self.game.get_players_list(conn),
            ClientMessage::SendChatMessage { message, room } => {
                if self.chat.send_chat_message(conn, &message, room.as_deref()) > 0 {
                    self.metrics.chat_messages.fetch_add(1, Ordering::Relaxed);
                }
            }
            ClientMessage::Ping { timestamp } => {
                self.hub.send_to(
                    conn,
                    &ServerMessage::Pong {
                        client_timestamp: timestamp,
                        server_timestamp: unix_millis(),
                    },
                );
            }
            #[cfg(feature = "lobby")]
            lobby @ (ClientMessage::CreateRoom { .. }
            | ClientMessage::JoinRoom { .. }
            | ClientMessage::LeaveRoom { .. }
            | ClientMessage::GetRooms) => self.handle_lobby(conn, lobby),
            #[cfg(not(feature = "lobby"))]
            other => debug!("Lobby disabled, ignoring {} from {}", other.event(), conn),
        }
    }

    #[cfg(feature = "lobby")]
    fn handle_lobby(&self, conn: ConnectionId, message: ClientMessage) {
        if !self.store.is_registered(conn) {
            self.reject(conn, "Join the game first");
            return;
        }

        let result = match message {
            ClientMessage::CreateRoom { room } => self
                .hub
                .create_room(&room)
                .and_then(|()| self.hub.join_room(conn, &room))
                .map(|()| self.room_joined(room)),
            ClientMessage::JoinRoom { room } => self
                .hub
                .join_room(conn, &room)
                .map(|()| self.room_joined(room)),
            ClientMessage::LeaveRoom { room } => {
                if room == GLOBAL_ROOM {
                    self.reject(conn, "Cannot leave the global room");
                    return;
                }
                self.hub
                    .leave_room(conn, &room)
                    .map(|()| ServerMessage::RoomLeft { room })
            }
            ClientMessage::GetRooms => Ok(ServerMessage::RoomsList {
                rooms: self.hub.list_rooms(),
            }),
            _ => return,
        };

        match result {
            Ok(reply) => {
                self.hub.send_to(conn, &reply);
            }
            Err(e) => self.reject(conn, &e.to_string()),
        }
    }

    #[cfg(feature = "lobby")]
    fn room_joined(&self, room: String) -> ServerMessage {
        let members = self.hub.room_members(&room);
        ServerMessage::RoomJoined { room, members }
    }

    #[cfg(feature = "lobby")]
    fn reject(&self, conn: ConnectionId, reason: &str) {
        debug!("Lobby request from {} rejected: {}", conn, reason);
        self.hub.send_to(
            conn,
            &ServerMessage::Error {
                reason: reason.to_string(),
            },
        );
    }

    /// Tear down a connection: leave every room, remove the player, release
    /// the registry entry. Safe to call more than once.
    pub fn disconnect(&self, conn: ConnectionId) -> bool {
        self.hub.detach(conn);
        let was_player = self.game.disconnect(conn);
        let released = self.registry.on_disconnect(conn);

        if let Some(connection) = &released {
            self.metrics.connection_closed();
            info!(
                "Connection {} closed ({} messages, {} bytes, player: {})",
                conn, connection.messages_received, connection.bytes_received, was_player
            );
        }
        self.metrics.update_store(self.store.stats());
        released.is_some()
    }

    /// Close connections that have been silent for longer than `idle_timeout`
    pub fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let mut reaped = 0;
        for id in self.registry.stale(idle_timeout) {
            if self.registry.request_close(id) {
                info!("Closing idle connection {}", id);
                reaped += 1;
            }
        }
        self.metrics
            .connections_reaped
            .fetch_add(reaped as u64, Ordering::Relaxed);
        reaped
    }
}

/// Periodically close idle connections
pub fn start_idle_reaper(
    session: Arc<GameSession>,
    idle_timeout: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            session.reap_idle(idle_timeout);
        }
    })
}
