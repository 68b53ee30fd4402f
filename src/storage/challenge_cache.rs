//! Local cache of challenge progress.
//!
//! Keeps the last known progress per user so it can be shown before the
//! first remote push arrives. One row per (user, challenge type).

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use std::path::Path;

use super::database::{Database, DatabaseError};
use crate::social::{ChallengeProgress, ChallengeType};

/// SQLite-backed challenge progress cache.
pub struct ChallengeCache {
    db: Database,
}

impl ChallengeCache {
    /// Open or create the cache at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::open_in_memory()?,
        })
    }

    /// Replace a user's cached progress and stamp the sync time.
    pub fn save(&self, user_id: &str, progress: &[ChallengeProgress]) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.connection();
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tx.execute("DELETE FROM challenge_progress WHERE user_id = ?1", [user_id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        for entry in progress {
            tx.execute(
                "INSERT OR REPLACE INTO challenge_progress (user_id, challenge_type, progress, goal, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    entry.challenge_type.as_str(),
                    entry.progress,
                    entry.goal,
                    now,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO challenge_sync (user_id, synced_at) VALUES (?1, ?2)",
            params![user_id, now],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    /// Cached progress for a user, in challenge type order.
    pub fn load(&self, user_id: &str) -> Result<Vec<ChallengeProgress>, DatabaseError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                "SELECT challenge_type, progress, goal FROM challenge_progress
                 WHERE user_id = ?1",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut progress = Vec::new();
        for row in rows {
            let (key, value, goal) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            match key.parse::<ChallengeType>() {
                Ok(challenge_type) => progress.push(ChallengeProgress {
                    challenge_type,
                    progress: value,
                    goal,
                }),
                Err(e) => tracing::debug!("Ignoring cached challenge: {}", e),
            }
        }
        progress.sort_by_key(|p| p.challenge_type);
        Ok(progress)
    }

    /// When the user's progress was last saved.
    pub fn last_synced(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let conn = self.db.connection();
        let result = conn.query_row(
            "SELECT synced_at FROM challenge_sync WHERE user_id = ?1",
            [user_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(stamp) => DateTime::parse_from_rfc3339(&stamp)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| DatabaseError::QueryFailed(e.to_string())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Whether the cached copy is missing or older than `interval`.
    pub fn needs_sync(&self, user_id: &str, interval: Duration) -> Result<bool, DatabaseError> {
        Ok(match self.last_synced(user_id)? {
            Some(synced_at) => Utc::now() - synced_at >= interval,
            None => true,
        })
    }

    /// Remove everything cached for a user.
    pub fn clear(&self, user_id: &str) -> Result<(), DatabaseError> {
        let conn = self.db.connection();
        conn.execute("DELETE FROM challenge_progress WHERE user_id = ?1", [user_id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        conn.execute("DELETE FROM challenge_sync WHERE user_id = ?1", [user_id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}
