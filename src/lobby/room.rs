use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::net::connection::ConnectionId;

/// A named broadcast scope
#[derive(Debug)]
pub struct Room {
    pub name: String,
    pub created_at: Instant,
    /// Permanent rooms survive having no members
    pub permanent: bool,
    pub max_members: Option<usize>,
    members: HashSet<ConnectionId>,
}

impl Room {
    pub fn new(name: String, max_members: usize) -> Self {
        Self {
            name,
            created_at: Instant::now(),
            permanent: false,
            max_members: Some(max_members),
            members: HashSet::new(),
        }
    }

    /// An unbounded room that is never removed
    pub fn permanent(name: String) -> Self {
        Self {
            name,
            created_at: Instant::now(),
            permanent: true,
            max_members: None,
            members: HashSet::new(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_members
            .map(|max| self.members.len() >= max)
            .unwrap_or(false)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains(&id)
    }

    /// Add a member. Joining twice is not an error.
    pub fn add_member(&mut self, id: ConnectionId) -> Result<(), RoomError> {
        if self.members.contains(&id) {
            return Ok(());
        }
        if self.is_full() {
            return Err(RoomError::RoomFull);
        }
        self.members.insert(id);
        Ok(())
    }

    pub fn remove_member(&mut self, id: ConnectionId) -> bool {
        self.members.remove(&id)
    }

    /// Members in no particular order
    pub fn iter_members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.members.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Eligible for removal
    pub fn is_abandoned(&self) -> bool {
        !self.permanent && self.is_empty()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            name: self.name.clone(),
            members: self.member_count(),
        }
    }
}

/// Room information for listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub members: usize,
}

/// Room errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_new() {
        let room = Room::new("den".to_string(), 4);
        assert!(room.is_empty());
        assert!(room.is_abandoned());
    }

    #[test]
    fn test_add_remove_member() {
        let mut room = Room::new("den".to_string(), 4);
        let id = ConnectionId::new();

        room.add_member(id).unwrap();
        room.add_member(id).unwrap();
        assert_eq!(room.member_count(), 1);
        assert!(room.contains(id));

        assert!(room.remove_member(id));
        assert!(!room.remove_member(id));
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_full() {
        let mut room = Room::new("den".to_string(), 2);
        room.add_member(ConnectionId::new()).unwrap();
        room.add_member(ConnectionId::new()).unwrap();

        let result = room.add_member(ConnectionId::new());
        assert!(matches!(result, Err(RoomError::RoomFull)));
    }

    #[test]
    fn test_permanent_room() {
        let mut room = Room::permanent("globalRoom".to_string());
        for _ in 0..500 {
            room.add_member(ConnectionId::new()).unwrap();
        }
        assert!(!room.is_full());

        let empty = Room::permanent("globalRoom".to_string());
        assert!(!empty.is_abandoned());
    }
}
