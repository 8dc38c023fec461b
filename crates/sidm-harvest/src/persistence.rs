//! Persistence capability: the work queue and the extracted values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PersistenceError};
use crate::types::{ExtractedRecord, Region, Screen};

/// Processing state of a queued unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Processed,
    Error,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Processed => "processed",
            UnitStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UnitStatus::Pending),
            "processed" => Some(UnitStatus::Processed),
            "error" => Some(UnitStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued (screen × region) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: i64,
    pub screen: Screen,
    pub region: Region,
    pub error_count: u32,
    pub last_error_kind: Option<ErrorKind>,
}

/// Storage for harvested values and the work queue.
pub trait Persistence: Send {
    /// Insert or overwrite by (screen, region, municipality, variable).
    fn upsert(&mut self, record: &ExtractedRecord) -> Result<(), PersistenceError>;

    /// Oldest unit by status timestamp that is not processed and has fewer
    /// than `max_errors` failures.
    fn next_pending_unit(&mut self, max_errors: u32) -> Result<Option<WorkUnit>, PersistenceError>;

    /// Mark processed and clear the error message.
    fn mark_processed(&mut self, unit: &WorkUnit) -> Result<(), PersistenceError>;

    /// Record a failure and increment the unit's error count.
    fn mark_error(
        &mut self,
        unit: &WorkUnit,
        message: &str,
        kind: ErrorKind,
    ) -> Result<(), PersistenceError>;

    /// Units that are not processed and reached `max_errors`.
    fn count_exhausted(&mut self, max_errors: u32) -> Result<usize, PersistenceError>;
}

/// A queue row as kept by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryUnit {
    pub unit: WorkUnit,
    pub status: UnitStatus,
    pub error_message: Option<String>,
    /// Logical clock value of the last status change.
    pub status_at: u64,
}

type RecordKey = (Screen, String, String, String);

/// In-memory store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    units: Vec<MemoryUnit>,
    records: BTreeMap<RecordKey, Option<String>>,
    clock: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Queue a pending unit and return its id.
    pub fn add_unit(&mut self, screen: Screen, region: Region) -> i64 {
        let id = self.units.len() as i64 + 1;
        let status_at = self.tick();
        self.units.push(MemoryUnit {
            unit: WorkUnit {
                id,
                screen,
                region,
                error_count: 0,
                last_error_kind: None,
            },
            status: UnitStatus::Pending,
            error_message: None,
            status_at,
        });
        id
    }

    pub fn unit(&self, id: i64) -> Option<&MemoryUnit> {
        self.units.iter().find(|u| u.unit.id == id)
    }

    /// Stored value of one cell; `None` when no record exists.
    pub fn value(
        &self,
        screen: Screen,
        region: &str,
        municipality: &str,
        variable: &str,
    ) -> Option<Option<&str>> {
        self.records
            .get(&(
                screen,
                region.to_string(),
                municipality.to_string(),
                variable.to_string(),
            ))
            .map(|v| v.as_deref())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Distinct variables stored for a screen and region.
    pub fn variables(&self, screen: Screen, region: &str) -> BTreeSet<&str> {
        self.records
            .keys()
            .filter(|(s, r, _, _)| *s == screen && r == region)
            .map(|(_, _, _, v)| v.as_str())
            .collect()
    }

    fn row_mut(&mut self, id: i64) -> Result<&mut MemoryUnit, PersistenceError> {
        self.units
            .iter_mut()
            .find(|u| u.unit.id == id)
            .ok_or_else(|| PersistenceError::Storage(format!("unknown unit {id}")))
    }
}

impl Persistence for MemoryStore {
    fn upsert(&mut self, record: &ExtractedRecord) -> Result<(), PersistenceError> {
        self.records.insert(
            (
                record.screen,
                record.region.clone(),
                record.municipality.clone(),
                record.variable.clone(),
            ),
            record.value.clone(),
        );
        Ok(())
    }

    fn next_pending_unit(&mut self, max_errors: u32) -> Result<Option<WorkUnit>, PersistenceError> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.status != UnitStatus::Processed && u.unit.error_count < max_errors)
            .min_by_key(|u| (u.status_at, u.unit.id))
            .map(|u| u.unit.clone()))
    }

    fn mark_processed(&mut self, unit: &WorkUnit) -> Result<(), PersistenceError> {
        let now = self.tick();
        let row = self.row_mut(unit.id)?;
        row.status = UnitStatus::Processed;
        row.error_message = None;
        row.status_at = now;
        Ok(())
    }

    fn mark_error(
        &mut self,
        unit: &WorkUnit,
        message: &str,
        kind: ErrorKind,
    ) -> Result<(), PersistenceError> {
        let now = self.tick();
        let row = self.row_mut(unit.id)?;
        row.status = UnitStatus::Error;
        row.error_message = Some(message.to_string());
        row.unit.error_count += 1;
        row.unit.last_error_kind = Some(kind);
        row.status_at = now;
        Ok(())
    }

    fn count_exhausted(&mut self, max_errors: u32) -> Result<usize, PersistenceError> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.status != UnitStatus::Processed && u.unit.error_count >= max_errors)
            .count())
    }
}
