//! SQLite-backed work queue and harvested values.
//!
//! Tables:
//! - `regions`, `provinces`, `screens`: the catalog, seeded idempotently
//!   from the embedded `resources/catalog.json`.
//! - `screen_region`: one queue row per (screen, region) with its status,
//!   error count and last failure.
//! - `screen_region_data`: one value per (screen, region, municipality,
//!   variable).
//!
//! Queue order uses `status_seq`, a counter bumped on every status change,
//! so "oldest status first" does not depend on clock resolution.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::{debug, info};

use sidm_harvest::{
    ErrorKind, ExtractedRecord, Persistence, PersistenceError, Province, Region, Screen,
    UnitStatus, WorkUnit,
};

const CATALOG: &str = include_str!("../resources/catalog.json");

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS regions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS provinces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    region_id INTEGER NOT NULL REFERENCES regions(id),
    is_capital INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS screens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT
);
CREATE TABLE IF NOT EXISTS screen_region (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    screen_id INTEGER NOT NULL REFERENCES screens(id),
    region_id INTEGER NOT NULL REFERENCES regions(id),
    status TEXT NOT NULL DEFAULT 'pending',
    status_at TEXT NOT NULL,
    status_seq INTEGER NOT NULL,
    error TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error_kind TEXT,
    UNIQUE (screen_id, region_id)
);
CREATE TABLE IF NOT EXISTS screen_region_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    screen_id INTEGER NOT NULL REFERENCES screens(id),
    region_id INTEGER NOT NULL REFERENCES regions(id),
    municipality TEXT NOT NULL,
    variable TEXT NOT NULL,
    value TEXT,
    downloaded_at TEXT NOT NULL,
    UNIQUE (screen_id, region_id, municipality, variable)
);
";

const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(status_seq), 0) + 1 FROM screen_region)";

#[derive(Debug, Deserialize)]
struct Catalog {
    regions: Vec<Region>,
    screens: Vec<CatalogScreen>,
}

#[derive(Debug, Deserialize)]
struct CatalogScreen {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

fn storage(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Storage(e.to_string())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Work queue and value store on a single SQLite connection.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    /// Open or create a store and its tables.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let db = Connection::open(path).map_err(storage)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory().map_err(storage)?)
    }

    fn init(db: Connection) -> Result<Self, PersistenceError> {
        db.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self { db })
    }

    /// Insert or refresh the embedded catalog and queue every
    /// (screen, region) pair that is not queued yet.
    pub fn seed_catalog(&mut self) -> Result<(), PersistenceError> {
        let catalog: Catalog = serde_json::from_str(CATALOG)
            .map_err(|e| PersistenceError::Corrupt(format!("embedded catalog: {e}")))?;
        let tx = self.db.transaction().map_err(storage)?;

        for region in &catalog.regions {
            tx.execute(
                "INSERT INTO regions (code, name) VALUES (?1, ?2)
                 ON CONFLICT(code) DO UPDATE SET name = excluded.name",
                params![region.code, region.name],
            )
            .map_err(storage)?;
            for province in &region.provinces {
                tx.execute(
                    "INSERT INTO provinces (code, name, region_id, is_capital)
                     VALUES (?1, ?2, (SELECT id FROM regions WHERE code = ?3), ?4)
                     ON CONFLICT(code) DO UPDATE SET
                        name = excluded.name,
                        region_id = excluded.region_id,
                        is_capital = excluded.is_capital",
                    params![province.code, province.name, region.code, province.is_capital],
                )
                .map_err(storage)?;
            }
        }

        for screen in &catalog.screens {
            if Screen::from_name(&screen.name).is_none() {
                return Err(PersistenceError::Corrupt(format!(
                    "unknown screen in catalog: {}",
                    screen.name
                )));
            }
            tx.execute(
                "INSERT INTO screens (name, description) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET description = excluded.description",
                params![screen.name, screen.description],
            )
            .map_err(storage)?;
        }

        let queued = tx
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO screen_region (screen_id, region_id, status, status_at, status_seq)
                     SELECT s.id, r.id, 'pending', ?1, {NEXT_SEQ} + s.id * 1000 + r.id
                     FROM screens s CROSS JOIN regions r
                     ORDER BY s.id, r.id"
                ),
                params![now()],
            )
            .map_err(storage)?;
        tx.commit().map_err(storage)?;

        info!(
            regions = catalog.regions.len(),
            screens = catalog.screens.len(),
            queued,
            "Catalog seeded"
        );
        Ok(())
    }

    fn provinces_of(&self, region_id: i64) -> Result<Vec<Province>, PersistenceError> {
        let mut stmt = self
            .db
            .prepare("SELECT code, name, is_capital FROM provinces WHERE region_id = ?1 ORDER BY code")
            .map_err(storage)?;
        let provinces = stmt
            .query_map(params![region_id], |row| {
                Ok(Province {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    is_capital: row.get(2)?,
                })
            })
            .map_err(storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage)?;
        Ok(provinces)
    }

    /// Stored value of one cell; `None` when no record exists.
    pub fn value(
        &self,
        screen: Screen,
        region: &str,
        municipality: &str,
        variable: &str,
    ) -> Result<Option<Option<String>>, PersistenceError> {
        self.db
            .query_row(
                "SELECT d.value FROM screen_region_data d
                 JOIN screens s ON s.id = d.screen_id
                 JOIN regions r ON r.id = d.region_id
                 WHERE s.name = ?1 AND r.code = ?2 AND d.municipality = ?3 AND d.variable = ?4",
                params![screen.name(), region, municipality, variable],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(storage)
    }

    pub fn record_count(&self) -> Result<usize, PersistenceError> {
        self.db
            .query_row("SELECT COUNT(*) FROM screen_region_data", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(storage)
    }

    /// Queue rows per status.
    pub fn status_counts(&self) -> Result<Vec<(UnitStatus, usize)>, PersistenceError> {
        let mut stmt = self
            .db
            .prepare("SELECT status, COUNT(*) FROM screen_region GROUP BY status ORDER BY status")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage)?;

        rows.into_iter()
            .map(|(status, count)| {
                UnitStatus::parse(&status)
                    .map(|s| (s, count as usize))
                    .ok_or_else(|| PersistenceError::Corrupt(format!("unknown status {status:?}")))
            })
            .collect()
    }

    /// Status and error message of a queue row.
    pub fn unit_state(&self, id: i64) -> Result<Option<(UnitStatus, Option<String>)>, PersistenceError> {
        let row = self
            .db
            .query_row(
                "SELECT status, error FROM screen_region WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()
            .map_err(storage)?;
        row.map(|(status, error)| {
            UnitStatus::parse(&status)
                .map(|s| (s, error))
                .ok_or_else(|| PersistenceError::Corrupt(format!("unknown status {status:?}")))
        })
        .transpose()
    }

    fn set_status(
        &self,
        id: i64,
        status: UnitStatus,
        error: Option<&str>,
        kind: Option<ErrorKind>,
    ) -> Result<(), PersistenceError> {
        let failed = status == UnitStatus::Error;
        let changed = self
            .db
            .execute(
                &format!(
                    "UPDATE screen_region SET
                        status = ?1,
                        status_at = ?2,
                        status_seq = {NEXT_SEQ},
                        error = ?3,
                        error_count = error_count + ?4,
                        last_error_kind = COALESCE(?5, last_error_kind)
                     WHERE id = ?6"
                ),
                params![
                    status.as_str(),
                    now(),
                    error,
                    failed as i64,
                    kind.map(ErrorKind::as_str),
                    id
                ],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(PersistenceError::Storage(format!("unknown unit {id}")));
        }
        debug!(unit = id, %status, "Unit status updated");
        Ok(())
    }
}

impl Persistence for SqliteStore {
    fn upsert(&mut self, record: &ExtractedRecord) -> Result<(), PersistenceError> {
        self.db
            .execute(
                "INSERT INTO screen_region_data
                    (screen_id, region_id, municipality, variable, value, downloaded_at)
                 VALUES (
                    (SELECT id FROM screens WHERE name = ?1),
                    (SELECT id FROM regions WHERE code = ?2),
                    ?3, ?4, ?5, ?6)
                 ON CONFLICT(screen_id, region_id, municipality, variable) DO UPDATE SET
                    value = excluded.value,
                    downloaded_at = excluded.downloaded_at",
                params![
                    record.screen.name(),
                    record.region,
                    record.municipality,
                    record.variable,
                    record.value,
                    now()
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn next_pending_unit(&mut self, max_errors: u32) -> Result<Option<WorkUnit>, PersistenceError> {
        let row = self
            .db
            .query_row(
                "SELECT q.id, s.name, r.id, r.code, r.name, q.error_count, q.last_error_kind
                 FROM screen_region q
                 JOIN screens s ON s.id = q.screen_id
                 JOIN regions r ON r.id = q.region_id
                 WHERE q.status != 'processed' AND q.error_count < ?1
                 ORDER BY q.status_seq, q.id
                 LIMIT 1",
                params![max_errors],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(storage)?;

        let Some((id, screen, region_id, code, name, error_count, kind)) = row else {
            return Ok(None);
        };
        let screen = Screen::from_name(&screen)
            .ok_or_else(|| PersistenceError::Corrupt(format!("unknown screen {screen:?}")))?;
        let last_error_kind = match kind {
            Some(kind) => Some(
                ErrorKind::parse(&kind)
                    .ok_or_else(|| PersistenceError::Corrupt(format!("unknown error kind {kind:?}")))?,
            ),
            None => None,
        };

        Ok(Some(WorkUnit {
            id,
            screen,
            region: Region {
                code,
                name,
                provinces: self.provinces_of(region_id)?,
            },
            error_count,
            last_error_kind,
        }))
    }

    fn mark_processed(&mut self, unit: &WorkUnit) -> Result<(), PersistenceError> {
        self.set_status(unit.id, UnitStatus::Processed, None, None)
    }

    fn mark_error(
        &mut self,
        unit: &WorkUnit,
        message: &str,
        kind: ErrorKind,
    ) -> Result<(), PersistenceError> {
        self.set_status(unit.id, UnitStatus::Error, Some(message), Some(kind))
    }

    fn count_exhausted(&mut self, max_errors: u32) -> Result<usize, PersistenceError> {
        self.db
            .query_row(
                "SELECT COUNT(*) FROM screen_region WHERE status != 'processed' AND error_count >= ?1",
                params![max_errors],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(storage)
    }
}
