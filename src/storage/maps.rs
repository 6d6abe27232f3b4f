//! Map persistence
//!
//! Maps live in a single `maps(id, map_code)` table. The server reads the whole
//! table once at startup; new maps saved while running join the rotation on
//! the next start.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::game::map::{MapDefinition, MapEntry, MapError};

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS maps (id INTEGER PRIMARY KEY, map_code TEXT NOT NULL)";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Map table is empty")]
    EmptyPool,
    #[error("Invalid map: {0}")]
    InvalidMap(#[from] MapError),
}

/// Read and write access to stored maps
#[derive(Debug, Clone)]
pub struct MapRepository {
    pool: SqlitePool,
}

impl MapRepository {
    /// Open the database and make sure the table exists
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await?;
        let repo = Self::from_pool(pool).await?;
        info!("Map database ready at {}", url);
        Ok(repo)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RepositoryError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Every stored map, ordered by id
    pub async fn load_all(&self) -> Result<Vec<MapEntry>, RepositoryError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, map_code FROM maps ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        debug!("Loaded {} maps", rows.len());
        Ok(rows
            .into_iter()
            .map(|(id, code)| MapEntry::new(id, code))
            .collect())
    }

    /// The rotation pool. An empty table is an error.
    pub async fn load_pool(&self) -> Result<Vec<MapEntry>, RepositoryError> {
        let maps = self.load_all().await?;
        if maps.is_empty() {
            return Err(RepositoryError::EmptyPool);
        }
        Ok(maps)
    }

    /// Validate and store a map, returns its id
    pub async fn save_map(&self, map_code: &str) -> Result<i64, RepositoryError> {
        let definition = MapDefinition::parse(map_code)?;
        let id = sqlx::query("INSERT INTO maps (map_code) VALUES (?)")
            .bind(map_code)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        info!("Saved map {} with {} objects", id, definition.len());
        Ok(id)
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM maps")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
