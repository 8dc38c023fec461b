//! Logical workbook model and the payload decoder capability.
//!
//! A decoder turns the bootstrap payload into a [`Workbook`] and folds
//! partial update payloads into an existing one. [`tableau::TableauDecoder`]
//! implements the vendor's presentation-model format.

pub mod tableau;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

pub use tableau::TableauDecoder;

/// One worksheet row: column id → cell value.
pub type Row = BTreeMap<String, Value>;

/// A named worksheet with its tabular data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorksheetData {
    pub name: String,
    /// Column ids in presentation order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl WorksheetData {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Typed value columns of one data segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub data_type: String,
    pub values: Vec<Value>,
}

/// Value dictionary accumulated across payloads, keyed by segment id.
///
/// Cells reference values by their offset in the concatenation of every
/// segment's column of the same data type, in segment-id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDictionary {
    segments: BTreeMap<u64, Vec<DataColumn>>,
}

impl DataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a segment.
    pub fn insert_segment(&mut self, id: u64, columns: Vec<DataColumn>) {
        self.segments.insert(id, columns);
    }

    /// Overlay another dictionary's segments onto this one.
    pub fn merge(&mut self, other: &DataDictionary) {
        for (id, columns) in &other.segments {
            self.segments.insert(*id, columns.clone());
        }
    }

    /// Concatenated values of one data type.
    pub fn values(&self, data_type: &str) -> Vec<&Value> {
        self.segments
            .values()
            .flat_map(|columns| columns.iter())
            .filter(|c| c.data_type == data_type)
            .flat_map(|c| c.values.iter())
            .collect()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// The visualization's logical data model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    /// Worksheets in the order the payload lists them.
    pub worksheets: Vec<WorksheetData>,
    pub dictionary: DataDictionary,
}

impl Workbook {
    pub fn worksheet(&self, name: &str) -> Option<&WorksheetData> {
        self.worksheets.iter().find(|w| w.name == name)
    }

    pub fn worksheet_names(&self) -> Vec<&str> {
        self.worksheets.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.worksheets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.worksheets.len()
    }
}

/// Decodes vendor payloads into a [`Workbook`].
pub trait PayloadDecoder: Send + Sync {
    /// Decode the initial full-state payload.
    fn decode(&self, bootstrap: &str) -> Result<Workbook, DecodeError>;

    /// Apply a partial update to `model`, returning the merged model.
    fn apply_update(&self, model: &Workbook, update: &str) -> Result<Workbook, DecodeError>;
}
