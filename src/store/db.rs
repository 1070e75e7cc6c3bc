use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::{Store, StoreError};
use crate::audit::{AuditMetrics, AuditScore, DeviceType, PageConfig, PageFilter};

const PAGE_COLUMNS: &str = "id, created_at, url, name, env, device, benchmark_score, threshold_percentage, is_enabled, auth";
const SCORE_COLUMNS: &str = "id, page_id, created_at, url, device, psi_score, seo_score, metrics";

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{:?}: {}", parent, e)))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::from_connection(conn)?;
        info!("Opened audit store at {:?}", db_path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Some(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let guard = self.conn()?;
        let conn = connection(&guard)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                env TEXT NOT NULL,
                device TEXT NOT NULL,
                benchmark_score INTEGER NOT NULL,
                threshold_percentage INTEGER NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                auth TEXT
            );

            CREATE TABLE IF NOT EXISTS audits (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                url TEXT NOT NULL,
                device TEXT NOT NULL,
                psi_score INTEGER NOT NULL,
                seo_score INTEGER NOT NULL,
                metrics TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pages_enabled ON pages(is_enabled);
            CREATE INDEX IF NOT EXISTS idx_audits_page_created ON audits(page_id, created_at DESC);
        ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Close the underlying connection. Later calls fail with `Unavailable`.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            info!("Audit store closed");
        }
        Ok(())
    }

    /// Cheap round trip used by the health endpoint.
    pub fn ping(&self) -> Result<(), StoreError> {
        let guard = self.conn()?;
        connection(&guard)?.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ========================================================================
    // Page management
    // ========================================================================

    pub fn insert_page(&self, page: &PageConfig) -> Result<(), StoreError> {
        let auth = page.auth.as_ref().map(serde_json::to_string).transpose()?;
        let guard = self.conn()?;
        connection(&guard)?.execute(
            &format!("INSERT INTO pages ({PAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                page.id,
                timestamp(&page.created_at),
                page.url,
                page.name,
                page.env,
                page.device.as_str(),
                page.benchmark_score,
                page.threshold_percentage,
                page.enabled as i64,
                auth,
            ],
        )?;
        Ok(())
    }

    pub fn list_pages(&self) -> Result<Vec<PageConfig>, StoreError> {
        self.find_pages(&PageFilter::default())
    }

    /// Overwrite the mutable fields of an existing page.
    pub fn update_page(&self, page: &PageConfig) -> Result<bool, StoreError> {
        let auth = page.auth.as_ref().map(serde_json::to_string).transpose()?;
        let guard = self.conn()?;
        let updated = connection(&guard)?.execute(
            "UPDATE pages SET name=?2, env=?3, device=?4, benchmark_score=?5, threshold_percentage=?6, is_enabled=?7, auth=?8
             WHERE id=?1",
            params![
                page.id,
                page.name,
                page.env,
                page.device.as_str(),
                page.benchmark_score,
                page.threshold_percentage,
                page.enabled as i64,
                auth,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Scores recorded for the page stay in place.
    pub fn delete_page(&self, id: &str) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        let deleted = connection(&guard)?.execute("DELETE FROM pages WHERE id=?1", params![id])?;
        Ok(deleted > 0)
    }
}

impl Store for SqliteStore {
    fn find_pages(&self, filter: &PageFilter) -> Result<Vec<PageConfig>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if filter.enabled_only {
            clauses.push("is_enabled = 1");
        }
        if let Some(url) = &filter.url {
            values.push(url.clone());
            clauses.push("url = ?");
        }
        if let Some(device) = &filter.device {
            values.push(device.as_str().to_string());
            clauses.push("device = ?");
        }
        if let Some(env) = &filter.env {
            values.push(env.clone());
            clauses.push("env = ?");
        }

        let mut sql = format!("SELECT {PAGE_COLUMNS} FROM pages");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, rowid");

        let guard = self.conn()?;
        let conn = connection(&guard)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), page_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn find_page_by_id(&self, id: &str) -> Result<Option<PageConfig>, StoreError> {
        let guard = self.conn()?;
        let page = connection(&guard)?
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id=?1"),
                params![id],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn insert_score(&self, score: &AuditScore) -> Result<String, StoreError> {
        let metrics = serde_json::to_string(&score.metrics)?;
        let guard = self.conn()?;
        connection(&guard)?.execute(
            &format!("INSERT INTO audits ({SCORE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                score.id,
                score.page_id,
                timestamp(&score.created_at),
                score.url,
                score.device.as_str(),
                score.psi_score,
                score.seo_score,
                metrics,
            ],
        )?;
        Ok(score.id.clone())
    }

    fn find_scores_by_page(&self, page_id: &str) -> Result<Vec<AuditScore>, StoreError> {
        let guard = self.conn()?;
        let conn = connection(&guard)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM audits WHERE page_id=?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![page_id], score_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn connection<'a>(guard: &'a MutexGuard<'_, Option<Connection>>) -> Result<&'a Connection, StoreError> {
    guard
        .as_ref()
        .ok_or_else(|| StoreError::Unavailable("store is closed".to_string()))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageConfig> {
    Ok(PageConfig {
        id: row.get(0)?,
        created_at: parse_timestamp(1, row.get(1)?)?,
        url: row.get(2)?,
        name: row.get(3)?,
        env: row.get(4)?,
        device: DeviceType::from(row.get::<_, String>(5)?),
        benchmark_score: row.get(6)?,
        threshold_percentage: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
        auth: row
            .get::<_, Option<String>>(9)?
            .map(|raw| parse_json(9, raw))
            .transpose()?,
    })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<AuditScore> {
    Ok(AuditScore {
        id: row.get(0)?,
        page_id: row.get(1)?,
        created_at: parse_timestamp(2, row.get(2)?)?,
        url: row.get(3)?,
        device: DeviceType::from(row.get::<_, String>(4)?),
        psi_score: row.get(5)?,
        seo_score: row.get(6)?,
        metrics: parse_json::<AuditMetrics>(7, row.get(7)?)?,
    })
}
