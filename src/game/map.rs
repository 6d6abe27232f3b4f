//! Map definitions
//!
//! The server treats map JSON as opaque except for locating the spawn point.
//! The raw text is rebroadcast to clients unchanged.

use serde::{Deserialize, Serialize};

use crate::game::constants::map::SPAWN_PREFAB_ID;
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

/// Errors raised while reading a map definition
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Invalid map JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One placed object in a map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapObject {
    pub prefab_id: String,
    pub position: Vec3,
    #[serde(default)]
    pub rotation_z: f32,
    #[serde(default = "default_scale")]
    pub scale: Vec2,
}

fn default_scale() -> Vec2 {
    Vec2::ONE
}

/// Ordered sequence of map objects
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MapDefinition {
    pub objects: Vec<MapObject>,
}

/// Accepted document shapes: the editor's `{"objects": [...]}` wrapper or a bare array
#[derive(Deserialize)]
#[serde(untagged)]
enum MapDocument {
    Wrapped { objects: Vec<MapObject> },
    Bare(Vec<MapObject>),
}

impl MapDefinition {
    /// Parse a map definition from its JSON text
    pub fn parse(json: &str) -> Result<Self, MapError> {
        let objects = match serde_json::from_str::<MapDocument>(json)? {
            MapDocument::Wrapped { objects } => objects,
            MapDocument::Bare(objects) => objects,
        };
        Ok(Self { objects })
    }

    /// Position of the first `cat_spawn` object, or the origin when there is none
    pub fn spawn_point(&self) -> Vec3 {
        self.objects
            .iter()
            .find(|object| object.prefab_id == SPAWN_PREFAB_ID)
            .map(|object| object.position)
            .filter(Vec3::is_finite)
            .unwrap_or(Vec3::ZERO)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A map row as stored in the map pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub id: i64,
    pub code: String,
}

impl MapEntry {
    pub fn new(id: i64, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
        }
    }
}
