//! Authoritative session state
//!
//! Every player, the active map, its spawn point and the dead-player set live
//! in one [`SessionState`] guarded by a single mutex inside [`SessionStore`].
//! Operations are short and synchronous; nothing does I/O while holding the lock.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::game::map::{MapDefinition, MapError};
use crate::net::connection::ConnectionId;
use crate::util::vec3::Vec3;

/// Players are identified by the connection they joined on
pub type PlayerId = ConnectionId;

/// Last reported position and animation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPosition {
    pub x: f32,
    pub y: f32,
    pub is_running: bool,
    pub is_idle: bool,
}

impl PlayerPosition {
    pub fn new(x: f32, y: f32, is_running: bool, is_idle: bool) -> Self {
        Self {
            x,
            y,
            is_running,
            is_idle,
        }
    }

    /// Idle at a spawn point
    pub fn at_spawn(spawn: Vec3) -> Self {
        Self::new(spawn.x, spawn.y, false, true)
    }
}

/// A joined player
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub pseudo: String,
    /// Completed the first ready handshake
    pub ready: bool,
    pub position: PlayerPosition,
    join_seq: u64,
}

/// Roster entry sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub pseudo: String,
}

/// Result of a ready signal
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyOutcome {
    /// First ready after joining: the player appears for everyone
    FirstSpawn { pseudo: String, spawn: Vec3 },
    /// Ready after a map change: the player moves to the new spawn
    Respawned { spawn: Vec3 },
    /// Already ready and alive
    AlreadyReady,
}

/// Counters for metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub players: usize,
    pub dead: usize,
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection {0} already joined")]
    DuplicateJoin(PlayerId),
    #[error("Unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("Player {0} has not signalled ready")]
    NotReady(PlayerId),
    #[error("Player {0} is waiting to respawn")]
    AwaitingRespawn(PlayerId),
    #[error("Map rejected: {0}")]
    MapParse(#[from] MapError),
}

/// Session state. Reached only through [`SessionStore`].
#[derive(Debug, Default)]
pub struct SessionState {
    players: HashMap<PlayerId, Player>,
    next_join_seq: u64,
    dead: HashSet<PlayerId>,
    current_map: Option<String>,
    spawn_point: Vec3,
    rotation_index: Option<usize>,
}

impl SessionState {
    pub fn register_player(&mut self, id: PlayerId, pseudo: String) -> Result<PlayerId, StoreError> {
        if self.players.contains_key(&id) {
            return Err(StoreError::DuplicateJoin(id));
        }

        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;
        self.players.insert(
            id,
            Player {
                id,
                pseudo,
                ready: false,
                position: PlayerPosition::at_spawn(self.spawn_point),
                join_seq,
            },
        );
        Ok(id)
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        self.dead.remove(&id);
        self.players.remove(&id)
    }

    /// Snapshot of the roster in join order
    pub fn list_players(&self) -> Vec<PlayerSummary> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.join_seq);
        players
            .into_iter()
            .map(|p| PlayerSummary {
                id: p.id,
                pseudo: p.pseudo.clone(),
            })
            .collect()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn is_registered(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Replace the active map. On parse failure the previous map and spawn stay.
    pub fn set_map(&mut self, map_json: &str) -> Result<Vec3, StoreError> {
        let definition = MapDefinition::parse(map_json)?;
        let spawn = definition.spawn_point();
        self.current_map = Some(map_json.to_string());
        self.spawn_point = spawn;
        Ok(spawn)
    }

    pub fn current_map(&self) -> Option<&str> {
        self.current_map.as_deref()
    }

    pub fn current_spawn_point(&self) -> Vec3 {
        self.spawn_point
    }

    /// Mark every registered player as pending respawn
    pub fn mark_all_dead(&mut self) -> usize {
        self.dead = self.players.keys().copied().collect();
        self.dead.len()
    }

    /// Clear one player's dead flag, returns whether it was set
    pub fn mark_respawned(&mut self, id: PlayerId) -> bool {
        self.dead.remove(&id)
    }

    pub fn is_dead(&self, id: PlayerId) -> bool {
        self.dead.contains(&id)
    }

    /// Resolve a ready signal against the current spawn point
    pub fn mark_ready(&mut self, id: PlayerId) -> Result<ReadyOutcome, StoreError> {
        let spawn = self.spawn_point;
        let player = self
            .players
            .get_mut(&id)
            .ok_or(StoreError::UnknownPlayer(id))?;
        let was_dead = self.dead.remove(&id);

        if !player.ready {
            player.ready = true;
            player.position = PlayerPosition::at_spawn(spawn);
            Ok(ReadyOutcome::FirstSpawn {
                pseudo: player.pseudo.clone(),
                spawn,
            })
        } else if was_dead {
            player.position = PlayerPosition::at_spawn(spawn);
            Ok(ReadyOutcome::Respawned { spawn })
        } else {
            Ok(ReadyOutcome::AlreadyReady)
        }
    }

    /// Record a movement. Only ready, living players are positioned.
    pub fn update_position(&mut self, id: PlayerId, position: PlayerPosition) -> Result<(), StoreError> {
        let player = self
            .players
            .get_mut(&id)
            .ok_or(StoreError::UnknownPlayer(id))?;
        if !player.ready {
            return Err(StoreError::NotReady(id));
        }
        if self.dead.contains(&id) {
            return Err(StoreError::AwaitingRespawn(id));
        }
        player.position = position;
        Ok(())
    }

    /// Advance the rotation index cyclically. The first call selects index 0.
    pub fn advance_rotation(&mut self, pool_len: usize) -> Option<usize> {
        if pool_len == 0 {
            return None;
        }
        let next = match self.rotation_index {
            Some(index) => (index + 1) % pool_len,
            None => 0,
        };
        self.rotation_index = Some(next);
        Some(next)
    }

    pub fn rotation_index(&self) -> Option<usize> {
        self.rotation_index
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            players: self.players.len(),
            dead: self.dead.len(),
        }
    }
}

/// Shared, lock-guarded session state
#[derive(Debug, Default)]
pub struct SessionStore {
    state: Mutex<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run several operations as one atomic step.
    /// `f` must not block or perform I/O.
    pub fn atomically<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn register_player(&self, id: PlayerId, pseudo: String) -> Result<PlayerId, StoreError> {
        self.state.lock().register_player(id, pseudo)
    }

    pub fn remove_player(&self, id: PlayerId) -> Option<Player> {
        self.state.lock().remove_player(id)
    }

    pub fn list_players(&self) -> Vec<PlayerSummary> {
        self.state.lock().list_players()
    }

    pub fn player(&self, id: PlayerId) -> Option<Player> {
        self.state.lock().player(id).cloned()
    }

    pub fn pseudo_of(&self, id: PlayerId) -> Option<String> {
        self.state.lock().player(id).map(|p| p.pseudo.clone())
    }

    pub fn is_registered(&self, id: PlayerId) -> bool {
        self.state.lock().is_registered(id)
    }

    pub fn set_map(&self, map_json: &str) -> Result<Vec3, StoreError> {
        self.state.lock().set_map(map_json)
    }

    pub fn current_map(&self) -> Option<String> {
        self.state.lock().current_map().map(str::to_string)
    }

    pub fn current_spawn_point(&self) -> Vec3 {
        self.state.lock().current_spawn_point()
    }

    pub fn mark_all_dead(&self) -> usize {
        self.state.lock().mark_all_dead()
    }

    pub fn mark_respawned(&self, id: PlayerId) -> bool {
        self.state.lock().mark_respawned(id)
    }

    pub fn is_dead(&self, id: PlayerId) -> bool {
        self.state.lock().is_dead(id)
    }

    pub fn mark_ready(&self, id: PlayerId) -> Result<ReadyOutcome, StoreError> {
        self.state.lock().mark_ready(id)
    }

    pub fn update_position(&self, id: PlayerId, position: PlayerPosition) -> Result<(), StoreError> {
        self.state.lock().update_position(id, position)
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats()
    }
}
