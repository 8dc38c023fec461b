//! Ordered record of the responses captured in the current page context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Classification;

/// A classified response body, as captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub classification: Classification,
    pub raw_payload: String,
    /// Strictly increasing across the ledger's whole lifetime.
    pub sequence_index: u64,
    pub capture_time: DateTime<Utc>,
}

/// Responses captured since the last reset, in arrival order.
///
/// A full reset starts a new context epoch (page reload). A partial reset
/// keeps only bootstrap entries, for tab changes within the same load.
/// Between two resets of either kind the ledger only grows.
#[derive(Debug, Default, Clone)]
pub struct ResponseLedger {
    entries: Vec<CapturedResponse>,
    next_index: u64,
    epoch: u64,
    generation: u64,
}

impl ResponseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response and return its sequence index.
    pub fn push(&mut self, classification: Classification, raw_payload: String) -> u64 {
        let sequence_index = self.next_index;
        self.next_index += 1;
        self.entries.push(CapturedResponse {
            classification,
            raw_payload,
            sequence_index,
            capture_time: Utc::now(),
        });
        sequence_index
    }

    /// Drop everything and start a new context epoch.
    pub fn reset_full(&mut self) {
        self.entries.clear();
        self.epoch += 1;
        self.generation += 1;
    }

    /// Keep only bootstrap entries.
    pub fn retain_bootstrap(&mut self) {
        self.entries
            .retain(|e| e.classification == Classification::Bootstrap);
        self.generation += 1;
    }

    pub fn entries(&self) -> &[CapturedResponse] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedResponse> {
        self.entries.iter()
    }

    pub fn count_of(&self, classification: Classification) -> usize {
        self.entries
            .iter()
            .filter(|e| e.classification == classification)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of full resets so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of resets of either kind so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
