//! Game event handling
//!
//! Drives each connection through `Connected -> Joined -> Ready` and back to
//! `AwaitingRespawn` after every map change. Out-of-order intents are dropped
//! without touching state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::game::constants::player::MAX_PSEUDO_LEN;
use crate::game::constants::room::GLOBAL_ROOM;
use crate::game::state::{PlayerPosition, ReadyOutcome, SessionState, SessionStore, StoreError};
use crate::lobby::manager::ManagerError;
use crate::net::connection::ConnectionId;
use crate::net::hub::Outbox;
use crate::net::protocol::ServerMessage;

enum JoinOutcome {
    Joined,
    Repeated,
    Undone(ManagerError),
    Rejected(StoreError),
}

pub struct GameEventHandler {
    store: Arc<SessionStore>,
    outbox: Arc<dyn Outbox>,
}

impl GameEventHandler {
    pub fn new(store: Arc<SessionStore>, outbox: Arc<dyn Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Register a connection as a player in the global room.
    ///
    /// Registration, the room join and the welcome are enqueued under the
    /// store lock, so a rotation lands either wholly before or wholly after
    /// the welcome.
    pub fn join_game(&self, conn: ConnectionId, pseudo: &str) {
        let pseudo = sanitize_pseudo(pseudo);
        if pseudo.is_empty() {
            warn!("Dropping joinGame with empty pseudo from {}", conn);
            return;
        }

        let outcome = self.store.atomically(|state| {
            match state.register_player(conn, pseudo.clone()) {
                Ok(_) => {}
                Err(StoreError::DuplicateJoin(_)) => {
                    self.send_welcome(conn, state);
                    return JoinOutcome::Repeated;
                }
                Err(e) => return JoinOutcome::Rejected(e),
            }

            if let Err(e) = self.outbox.join_room(conn, GLOBAL_ROOM) {
                // Connection went away between decode and join
                state.remove_player(conn);
                return JoinOutcome::Undone(e);
            }
            self.send_welcome(conn, state);
            JoinOutcome::Joined
        });

        match outcome {
            JoinOutcome::Joined => info!("Player {} joined as '{}'", conn, pseudo),
            JoinOutcome::Repeated => debug!("Repeated joinGame from {}, resent roster", conn),
            JoinOutcome::Undone(e) => debug!("Undoing join for {}: {}", conn, e),
            JoinOutcome::Rejected(e) => warn!("joinGame from {} rejected: {}", conn, e),
        }
    }

    fn send_welcome(&self, conn: ConnectionId, state: &SessionState) {
        self.outbox.send_to(
            conn,
            &ServerMessage::GameJoined {
                room: GLOBAL_ROOM.to_string(),
                id: conn,
            },
        );
        self.outbox.send_to(
            conn,
            &ServerMessage::PlayersList {
                players: state.list_players(),
            },
        );
        if let Some(map) = state.current_map() {
            self.outbox
                .send_to(conn, &ServerMessage::LoadMap(map.to_string()));
        }
    }

    /// Client finished loading the current map
    pub fn player_ready(&self, conn: ConnectionId) {
        match self.store.mark_ready(conn) {
            Ok(ReadyOutcome::FirstSpawn { pseudo, spawn }) => {
                self.outbox.broadcast(
                    GLOBAL_ROOM,
                    &ServerMessage::SpawnPlayer { id: conn, pseudo },
                );
                self.outbox
                    .send_to(conn, &ServerMessage::RespawnPlayer(spawn));
                debug!("Player {} spawned at ({}, {})", conn, spawn.x, spawn.y);
            }
            Ok(ReadyOutcome::Respawned { spawn }) => {
                self.outbox
                    .send_to(conn, &ServerMessage::RespawnPlayer(spawn));
                debug!("Player {} respawned at ({}, {})", conn, spawn.x, spawn.y);
            }
            Ok(ReadyOutcome::AlreadyReady) => {
                debug!("Ignoring repeated playerReady from {}", conn);
            }
            Err(e) => warn!("playerReady from {} dropped: {}", conn, e),
        }
    }

    /// Relay a movement to every other player in the room
    pub fn player_move(&self, conn: ConnectionId, position: PlayerPosition) {
        if !position.x.is_finite() || !position.y.is_finite() {
            debug!("Dropping non-finite move from {}", conn);
            return;
        }

        match self.store.update_position(conn, position) {
            Ok(()) => {
                self.outbox.broadcast_except(
                    GLOBAL_ROOM,
                    conn,
                    &ServerMessage::update_player(conn, position),
                );
            }
            Err(e) => debug!("playerMove from {} dropped: {}", conn, e),
        }
    }

    /// Refresh the roster for the whole room
    pub fn get_players_list(&self, conn: ConnectionId) {
        if !self.store.is_registered(conn) {
            debug!("getPlayersList from unjoined connection {}", conn);
            return;
        }
        self.outbox.broadcast(
            GLOBAL_ROOM,
            &ServerMessage::PlayersList {
                players: self.store.list_players(),
            },
        );
    }

    /// Remove the player behind a closed connection.
    /// Returns false when there was nothing to remove.
    pub fn disconnect(&self, conn: ConnectionId) -> bool {
        let Some(player) = self.store.remove_player(conn) else {
            return false;
        };

        self.outbox
            .broadcast(GLOBAL_ROOM, &ServerMessage::RemovePlayer { id: conn });
        self.outbox.broadcast(
            GLOBAL_ROOM,
            &ServerMessage::PlayersList {
                players: self.store.list_players(),
            },
        );
        info!("Player {} ('{}') left", conn, player.pseudo);
        true
    }
}

/// Trim, strip control and markup characters, collapse runs of whitespace
/// and cap the length.
pub fn sanitize_pseudo(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '&'))
        .collect();

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_PSEUDO_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::hub::tests::drain;
    use crate::net::hub::{Frame, RoomHub};
    use crate::util::vec3::Vec3;
    use tokio::sync::mpsc::UnboundedReceiver;

    const SPAWN_MAP: &str =
        r#"{"objects":[{"prefabId":"cat_spawn","position":{"x":3.0,"y":4.0,"z":0.0}}]}"#;

    struct Fixture {
        store: Arc<SessionStore>,
        hub: Arc<RoomHub>,
        handler: GameEventHandler,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(SessionStore::new());
            let hub = Arc::new(RoomHub::new(10));
            let handler = GameEventHandler::new(store.clone(), hub.clone());
            Self { store, hub, handler }
        }

        fn connect(&self) -> (ConnectionId, UnboundedReceiver<Frame>) {
            let id = ConnectionId::new();
            let rx = self.hub.attach(id);
            (id, rx)
        }

        fn joined(&self, pseudo: &str) -> (ConnectionId, UnboundedReceiver<Frame>) {
            let (id, mut rx) = self.connect();
            self.handler.join_game(id, pseudo);
            drain(&mut rx);
            (id, rx)
        }
    }

    #[test]
    fn test_sanitize_pseudo() {
        assert_eq!(sanitize_pseudo("  Alice  "), "Alice");
        assert_eq!(sanitize_pseudo("Al\u{0007}i<b>ce"), "Alibce");
        assert_eq!(sanitize_pseudo("Big   \t Cat"), "Big Cat");
        assert_eq!(sanitize_pseudo(" \n "), "");
        assert_eq!(sanitize_pseudo(&"x".repeat(100)).chars().count(), MAX_PSEUDO_LEN);
    }

    #[test]
    fn test_join_replies_to_sender_only() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.joined("Alice");
        let (b, mut rx_b) = fx.connect();

        fx.handler.join_game(b, "Bob");

        let messages = drain(&mut rx_b);
        assert_eq!(
            messages,
            vec![
                ServerMessage::GameJoined { room: GLOBAL_ROOM.to_string(), id: b },
                ServerMessage::PlayersList { players: fx.store.list_players() },
            ]
        );
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(fx.store.list_players().len(), 2);
        assert!(fx.hub.is_member(a, GLOBAL_ROOM));
        assert!(fx.hub.is_member(b, GLOBAL_ROOM));
    }

    #[test]
    fn test_join_sends_current_map() {
        let fx = Fixture::new();
        fx.store.set_map(SPAWN_MAP).unwrap();
        let (a, mut rx) = fx.connect();

        fx.handler.join_game(a, "Alice");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], ServerMessage::LoadMap(SPAWN_MAP.to_string()));
    }

    #[test]
    fn test_join_with_empty_pseudo_is_dropped() {
        let fx = Fixture::new();
        let (a, mut rx) = fx.connect();

        fx.handler.join_game(a, "   ");

        assert!(drain(&mut rx).is_empty());
        assert!(!fx.store.is_registered(a));
    }

    #[test]
    fn test_duplicate_join_keeps_identity() {
        let fx = Fixture::new();
        let (a, mut rx) = fx.joined("Alice");

        fx.handler.join_game(a, "Mallory");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(fx.store.pseudo_of(a).as_deref(), Some("Alice"));
        assert_eq!(fx.store.list_players().len(), 1);
    }

    #[test]
    fn test_join_on_closed_connection_is_undone() {
        let fx = Fixture::new();
        let ghost = ConnectionId::new();

        fx.handler.join_game(ghost, "Ghost");

        assert!(!fx.store.is_registered(ghost));
    }

    #[test]
    fn test_rotation_never_splits_welcome() {
        use crate::game::map::MapEntry;
        use crate::game::rotation::{MapPool, MapRotation};
        use crate::metrics::Metrics;

        let fx = Fixture::new();
        let rotation = MapRotation::new(
            MapPool::new(vec![MapEntry::new(1, SPAWN_MAP), MapEntry::new(2, "[]")]),
            fx.store.clone(),
            fx.hub.clone(),
            Arc::new(Metrics::new()),
        );
        rotation.run_cycle();

        let joiners: Vec<_> = (0..50).map(|_| fx.connect()).collect();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    rotation.run_cycle();
                }
            });
            for (i, (id, _)) in joiners.iter().enumerate() {
                fx.handler.join_game(*id, &format!("Cat{}", i));
            }
        });

        for (id, mut rx) in joiners {
            let messages = drain(&mut rx);
            assert_eq!(
                messages[0],
                ServerMessage::GameJoined { room: GLOBAL_ROOM.to_string(), id }
            );
            assert!(matches!(messages[1], ServerMessage::PlayersList { .. }));
            // The welcome always carries the map that was active at join time
            assert!(matches!(messages[2], ServerMessage::LoadMap(_)));
        }
    }

    #[test]
    fn test_first_ready_spawns_for_everyone() {
        let fx = Fixture::new();
        fx.store.set_map(SPAWN_MAP).unwrap();
        let (a, mut rx_a) = fx.joined("Alice");
        let (b, mut rx_b) = fx.joined("Bob");

        fx.handler.player_ready(b);

        let spawn = ServerMessage::SpawnPlayer { id: b, pseudo: "Bob".to_string() };
        assert_eq!(drain(&mut rx_a), vec![spawn.clone()]);
        assert_eq!(
            drain(&mut rx_b),
            vec![spawn, ServerMessage::RespawnPlayer(Vec3::new(3.0, 4.0, 0.0))]
        );
        assert!(!fx.store.is_dead(a));
    }

    #[test]
    fn test_ready_while_alive_is_ignored() {
        let fx = Fixture::new();
        let (a, mut rx) = fx.joined("Alice");
        fx.handler.player_ready(a);
        drain(&mut rx);

        fx.handler.player_ready(a);

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_ready_while_dead_respawns_sender_only() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.joined("Alice");
        let (b, mut rx_b) = fx.joined("Bob");
        fx.handler.player_ready(a);
        fx.handler.player_ready(b);
        drain(&mut rx_a);
        drain(&mut rx_b);

        fx.store.set_map(SPAWN_MAP).unwrap();
        fx.store.mark_all_dead();
        fx.handler.player_ready(a);

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::RespawnPlayer(Vec3::new(3.0, 4.0, 0.0))]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert!(!fx.store.is_dead(a));
        assert!(fx.store.is_dead(b));
    }

    #[test]
    fn test_ready_before_join_is_noop() {
        let fx = Fixture::new();
        let (a, mut rx) = fx.connect();

        fx.handler.player_ready(a);

        assert!(drain(&mut rx).is_empty());
        assert!(!fx.store.is_registered(a));
    }

    #[test]
    fn test_move_is_echoed_to_others_only() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.joined("Alice");
        let (b, mut rx_b) = fx.joined("Bob");
        fx.handler.player_ready(a);
        fx.handler.player_ready(b);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let pos = PlayerPosition::new(5.0, 2.0, true, false);
        fx.handler.player_move(a, pos);

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::update_player(a, pos)]);
        assert_eq!(fx.store.player(a).unwrap().position, pos);
    }

    #[test]
    fn test_move_requires_ready_and_alive() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.joined("Alice");
        let (_b, mut rx_b) = fx.joined("Bob");
        let pos = PlayerPosition::new(1.0, 1.0, false, false);

        fx.handler.player_move(a, pos);
        assert!(drain(&mut rx_b).is_empty());

        fx.handler.player_ready(a);
        drain(&mut rx_b);
        fx.store.mark_all_dead();
        fx.handler.player_move(a, pos);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_non_finite_move_is_dropped() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.joined("Alice");
        let (_b, mut rx_b) = fx.joined("Bob");
        fx.handler.player_ready(a);
        drain(&mut rx_b);
        let before = fx.store.player(a).unwrap().position;

        fx.handler
            .player_move(a, PlayerPosition::new(f32::NAN, 2.0, false, false));

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(fx.store.player(a).unwrap().position, before);
    }

    #[test]
    fn test_get_players_list_broadcasts_to_room() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.joined("Alice");
        let (_b, mut rx_b) = fx.joined("Bob");
        let (outsider, mut rx_out) = fx.connect();

        fx.handler.get_players_list(a);
        fx.handler.get_players_list(outsider);

        let expected = ServerMessage::PlayersList { players: fx.store.list_players() };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
        assert!(drain(&mut rx_out).is_empty());
    }

    #[test]
    fn test_disconnect_broadcasts_once() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.joined("Alice");
        let (b, mut rx_b) = fx.joined("Bob");
        fx.hub.detach(a);

        assert!(fx.handler.disconnect(a));
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerMessage::RemovePlayer { id: a },
                ServerMessage::PlayersList {
                    players: vec![crate::game::state::PlayerSummary {
                        id: b,
                        pseudo: "Bob".to_string()
                    }]
                },
            ]
        );

        assert!(!fx.handler.disconnect(a));
        assert!(drain(&mut rx_b).is_empty());
    }
}
