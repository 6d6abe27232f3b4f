use std::collections::{HashMap, HashSet};

use crate::game::constants::room::{MAX_MEMBERS, MAX_NAME_LEN};
use crate::lobby::room::{Room, RoomError, RoomInfo};
use crate::net::connection::ConnectionId;

/// Room membership for every connection.
///
/// A connection may belong to several rooms. Non-permanent rooms are removed
/// as soon as their last member leaves.
pub struct LobbyManager {
    rooms: HashMap<String, Room>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
    max_rooms: usize,
    default_room_size: usize,
}

impl LobbyManager {
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            max_rooms,
            default_room_size: MAX_MEMBERS,
        }
    }

    /// Create a room that is never removed (idempotent)
    pub fn ensure_permanent_room(&mut self, name: &str) {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::permanent(name.to_string()));
    }

    /// Create a new room
    pub fn create_room(&mut self, name: &str) -> Result<(), ManagerError> {
        validate_room_name(name)?;
        if self.rooms.contains_key(name) {
            return Err(ManagerError::RoomExists);
        }
        if self.rooms.len() >= self.max_rooms {
            return Err(ManagerError::TooManyRooms);
        }

        self.rooms.insert(
            name.to_string(),
            Room::new(name.to_string(), self.default_room_size),
        );
        Ok(())
    }

    /// Add a connection to an existing room
    pub fn join_room(&mut self, id: ConnectionId, name: &str) -> Result<(), ManagerError> {
        let room = self.rooms.get_mut(name).ok_or(ManagerError::RoomNotFound)?;
        room.add_member(id)?;
        self.memberships
            .entry(id)
            .or_default()
            .insert(name.to_string());
        Ok(())
    }

    /// Remove a connection from one room
    pub fn leave_room(&mut self, id: ConnectionId, name: &str) -> Result<(), ManagerError> {
        let removed = self
            .memberships
            .get_mut(&id)
            .map(|rooms| rooms.remove(name))
            .unwrap_or(false);
        if !removed {
            return Err(ManagerError::NotInRoom);
        }
        if self.memberships.get(&id).is_some_and(HashSet::is_empty) {
            self.memberships.remove(&id);
        }

        self.remove_member_from(id, name);
        Ok(())
    }

    /// Remove a connection from every room, returns the rooms it left
    pub fn leave_all(&mut self, id: ConnectionId) -> Vec<String> {
        let mut left: Vec<String> = self
            .memberships
            .remove(&id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        left.sort();

        for name in &left {
            self.remove_member_from(id, name);
        }
        left
    }

    fn remove_member_from(&mut self, id: ConnectionId, name: &str) {
        let abandoned = match self.rooms.get_mut(name) {
            Some(room) => {
                room.remove_member(id);
                room.is_abandoned()
            }
            None => false,
        };
        if abandoned {
            self.rooms.remove(name);
        }
    }

    pub fn is_member(&self, id: ConnectionId, name: &str) -> bool {
        self.rooms
            .get(name)
            .map(|room| room.contains(id))
            .unwrap_or(false)
    }

    /// Members of a room without copying them out. Empty for unknown rooms.
    pub fn iter_members<'a>(&'a self, name: &str) -> impl Iterator<Item = ConnectionId> + 'a {
        self.rooms.get(name).into_iter().flat_map(|room| room.iter_members())
    }

    pub fn members(&self, name: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(name)
            .map(Room::member_ids)
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(&id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn get_room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get list of rooms (for room browser), sorted by name
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self.rooms.values().map(Room::info).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}

impl Default for LobbyManager {
    fn default() -> Self {
        Self::new(crate::game::constants::room::DEFAULT_MAX_ROOMS)
    }
}

fn validate_room_name(name: &str) -> Result<(), ManagerError> {
    let valid = !name.trim().is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(ManagerError::InvalidName)
    }
}

/// Manager errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    #[error("Too many rooms")]
    TooManyRooms,
    #[error("Room already exists")]
    RoomExists,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Not in that room")]
    NotInRoom,
    #[error("Invalid room name")]
    InvalidName,
    #[error("Connection is closed")]
    NotConnected,
    #[error("Room error: {0}")]
    RoomError(#[from] RoomError),
}
