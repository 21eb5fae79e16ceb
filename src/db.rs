//! SQLite catalog store
//!
//! Concrete implementation of the pipeline's collaborator interfaces:
//! duplicate lookup, save, commit-status view and summary persistence.
//! Entries are keyed on the repository URL; re-ingesting a known repository
//! updates the row in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use crate::catalog::{CatalogView, CatalogWriter, DuplicateChecker, SummaryRecord, SummaryWriter};
use crate::config::Config;
use crate::gate::CommitStatus;
use crate::scrape::ScrapedLibrary;

/// A stored catalog entry, as needed by the maintenance refresh job
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub repository_url: String,
    pub last_commit_at: DateTime<Utc>,
}

/// Catalog counters for the stats command
#[derive(Debug, Default)]
pub struct CatalogStats {
    pub total: u64,
    pub libraries: u64,
    pub web_apps: u64,
    pub summaries: u64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open() -> Result<Self> {
        let db_path = Config::db_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;

        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database for testing
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                script_id TEXT NOT NULL,
                script_type TEXT NOT NULL,
                repository_url TEXT UNIQUE NOT NULL,
                author_name TEXT NOT NULL,
                author_url TEXT NOT NULL,
                description TEXT,
                license_name TEXT,
                license_url TEXT,
                star_count INTEGER DEFAULT 0,
                last_commit_at TEXT NOT NULL,
                status TEXT NOT NULL,
                readme TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_libraries_script_id ON libraries(script_id);
            CREATE INDEX IF NOT EXISTS idx_libraries_type ON libraries(script_type);

            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                library_id INTEGER UNIQUE NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
                body TEXT NOT NULL,
                model TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Insert or update a scraped record, keyed on repository URL.
    /// Returns the catalog row id.
    pub fn upsert_library(&self, library: &ScrapedLibrary) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO libraries (
                name, script_id, script_type, repository_url, author_name,
                author_url, description, license_name, license_url, star_count,
                last_commit_at, status, readme, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            ON CONFLICT(repository_url) DO UPDATE SET
                name = excluded.name,
                script_id = excluded.script_id,
                script_type = excluded.script_type,
                author_name = excluded.author_name,
                author_url = excluded.author_url,
                description = excluded.description,
                license_name = excluded.license_name,
                license_url = excluded.license_url,
                star_count = excluded.star_count,
                last_commit_at = excluded.last_commit_at,
                readme = excluded.readme,
                updated_at = excluded.updated_at",
            params![
                library.name,
                library.script_id,
                library.script_type.as_str(),
                library.repository_url,
                library.author_name,
                library.author_url,
                library.description,
                library.license_name,
                library.license_url,
                library.star_count as i64,
                library.last_commit_at.to_rfc3339(),
                library.status.as_str(),
                library.readme,
                now,
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM libraries WHERE repository_url = ?1",
            params![library.repository_url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn script_id_exists(&self, script_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM libraries WHERE script_id = ?1 LIMIT 1",
                params![script_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn commit_status_sync(
        &self,
        repository_url: &str,
        scraped_commit_at: DateTime<Utc>,
    ) -> Result<CommitStatus> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, last_commit_at FROM libraries WHERE repository_url = ?1",
                params![repository_url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(CommitStatus::new_entry()),
            Some((id, stored)) => {
                let stored = DateTime::parse_from_rfc3339(&stored)
                    .with_context(|| format!("bad stored timestamp for {}", repository_url))?
                    .with_timezone(&Utc);
                Ok(CommitStatus::existing(id.to_string(), stored, scraped_commit_at))
            }
        }
    }

    fn has_summary_sync(&self, library_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM summaries WHERE library_id = ?1",
                params![library_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_summary(&self, library_id: i64, summary: &SummaryRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO summaries (library_id, body, model, generated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(library_id) DO UPDATE SET
                body = excluded.body,
                model = excluded.model,
                generated_at = excluded.generated_at",
            params![
                library_id,
                summary.body,
                summary.model,
                summary.generated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Drop the summary row so the gate's backfill path regenerates it
    pub fn clear_summary(&self, library_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM summaries WHERE library_id = ?1", params![library_id])?;
        Ok(())
    }

    /// Catalog entries in insertion order, for the maintenance refresh job
    pub fn list_entries(&self, limit: usize, offset: usize) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, repository_url, last_commit_at
             FROM libraries ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, name, repository_url, last_commit_at) = row?;
            let last_commit_at = DateTime::parse_from_rfc3339(&last_commit_at)
                .with_context(|| format!("bad stored timestamp for {}", repository_url))?
                .with_timezone(&Utc);
            entries.push(CatalogEntry {
                id,
                name,
                repository_url,
                last_commit_at,
            });
        }
        Ok(entries)
    }

    /// Record a refreshed commit date for an existing entry
    pub fn update_commit_date(&self, library_id: i64, last_commit_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE libraries SET last_commit_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                last_commit_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                library_id
            ],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<u64> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        Ok(CatalogStats {
            total: count("SELECT COUNT(*) FROM libraries")?,
            libraries: count("SELECT COUNT(*) FROM libraries WHERE script_type = 'library'")?,
            web_apps: count("SELECT COUNT(*) FROM libraries WHERE script_type = 'web_app'")?,
            summaries: count("SELECT COUNT(*) FROM summaries")?,
        })
    }
}

#[async_trait]
impl DuplicateChecker for Database {
    async fn is_duplicate(&self, script_id: &str) -> Result<bool> {
        self.script_id_exists(script_id)
    }
}

#[async_trait]
impl CatalogWriter for Database {
    async fn save(&self, library: &ScrapedLibrary, generate_summary: bool) -> Result<String> {
        let id = self.upsert_library(library)?;
        // A regeneration is coming: drop the old summary now so a crash
        // cannot leave last run's text attached to the updated entry
        if generate_summary {
            self.clear_summary(id)?;
        }
        Ok(id.to_string())
    }
}

#[async_trait]
impl CatalogView for Database {
    async fn commit_status(
        &self,
        repository_url: &str,
        scraped_commit_at: DateTime<Utc>,
    ) -> Result<CommitStatus> {
        self.commit_status_sync(repository_url, scraped_commit_at)
    }

    async fn has_summary(&self, catalog_id: &str) -> Result<bool> {
        let id: i64 = catalog_id
            .parse()
            .with_context(|| format!("bad catalog id: {}", catalog_id))?;
        self.has_summary_sync(id)
    }
}

#[async_trait]
impl SummaryWriter for Database {
    async fn save_summary(&self, catalog_id: &str, summary: &SummaryRecord) -> Result<()> {
        let id: i64 = catalog_id
            .parse()
            .with_context(|| format!("bad catalog id: {}", catalog_id))?;
        self.insert_summary(id, summary)
    }
}
