use crate::error::Result;
use crate::storage::Storage;
use crate::types::ChatId;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCompetition {
    pub id: String,
    pub group_id: ChatId,
    pub phase: String,
    /// Serialized competition record.
    pub snapshot: String,
    pub updated_at: DateTime<Utc>,
}

pub struct CompetitionStore<'a> {
    storage: &'a Storage,
}

impl<'a> CompetitionStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn save(&self, record: &StoredCompetition) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR REPLACE INTO competitions (id, group_id, phase, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.group_id,
                record.phase,
                record.snapshot,
                record.updated_at.timestamp_millis(),
            ],
        )?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<StoredCompetition>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, group_id, phase, snapshot, updated_at
             FROM competitions ORDER BY updated_at ASC",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(StoredCompetition {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    phase: row.get(2)?,
                    snapshot: row.get(3)?,
                    updated_at: DateTime::from_timestamp_millis(row.get(4)?)
                        .unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;
        let removed = conn.execute("DELETE FROM competitions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}
