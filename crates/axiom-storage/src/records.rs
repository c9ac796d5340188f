//! Tab records
//!
//! One row per logical tab: which backend hosts it, what it shows and
//! whether it is the visible one. At most one record is active.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::StorageError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: String,
    pub backend: String,
    pub title: String,
    pub url: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl TabRecord {
    pub fn new(id: impl Into<String>, backend: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend: backend.into(),
            title: String::new(),
            url: url.into(),
            active: false,
            updated_at: Utc::now(),
        }
    }
}

const COLUMNS: &str = "id, backend, title, url, active, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<(TabRecord, String)> {
    let updated_str: String = row.get(5)?;
    let record = TabRecord {
        id: row.get(0)?,
        backend: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        active: row.get::<_, i32>(4)? != 0,
        updated_at: Utc::now(),
    };
    Ok((record, updated_str))
}

fn parse_timestamp(mut record: TabRecord, raw: String) -> Result<TabRecord> {
    record.updated_at = DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            id: record.id.clone(),
            reason: format!("updated_at {:?}: {}", raw, e),
        })?;
    Ok(record)
}

#[derive(Clone)]
pub struct TabStore {
    db: Database,
}

impl TabStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or fully replace a record.
    pub fn upsert(&self, record: &TabRecord) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tab_records (id, backend, title, url, active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.backend,
                    record.title,
                    record.url,
                    record.active as i32,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(tab_id = %record.id, backend = %record.backend, "Saved tab record");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<TabRecord>> {
        let row = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM tab_records WHERE id = ?1", COLUMNS),
                    [id],
                    from_row,
                )
                .optional()?)
        })?;

        row.map(|(record, raw)| parse_timestamp(record, raw))
            .transpose()
    }

    pub fn list(&self) -> Result<Vec<TabRecord>> {
        let rows = self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tab_records ORDER BY updated_at, id",
                COLUMNS
            ))?;
            let rows = stmt
                .query_map([], from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(record, raw)| parse_timestamp(record, raw))
            .collect()
    }

    pub fn active(&self) -> Result<Option<TabRecord>> {
        Ok(self.list()?.into_iter().find(|r| r.active))
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.db.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM tab_records WHERE id = ?1", [id])?)
        })?;
        Ok(removed > 0)
    }

    /// Mark one record active and every other inactive.
    pub fn set_active(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.transaction(|conn| {
            let updated = conn.execute(
                "UPDATE tab_records SET active = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(id.to_string()));
            }
            conn.execute(
                "UPDATE tab_records SET active = 0 WHERE id != ?1 AND active != 0",
                [id],
            )?;
            Ok(())
        })
    }

    /// Clear the active flag if `id` holds it.
    pub fn deactivate(&self, id: &str) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute("UPDATE tab_records SET active = 0 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.update_column(id, "title", title)
    }

    pub fn update_url(&self, id: &str, url: &str) -> Result<()> {
        self.update_column(id, "url", url)
    }

    pub fn update_backend(&self, id: &str, backend: &str) -> Result<()> {
        self.update_column(id, "backend", backend)
    }

    fn update_column(&self, id: &str, column: &'static str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with_connection(|conn| {
            let updated = conn.execute(
                &format!(
                    "UPDATE tab_records SET {} = ?2, updated_at = ?3 WHERE id = ?1",
                    column
                ),
                params![id, value, now],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}
