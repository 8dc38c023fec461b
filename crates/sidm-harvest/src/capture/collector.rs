//! Drains the probe buffer into the ledger.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::cache::{CacheScope, DebugCache};
use super::ledger::ResponseLedger;
use super::probe::ProbeEntry;
use crate::decoder::{PayloadDecoder, Workbook};
use crate::driver::BrowserDriver;
use crate::error::{DriverError, HarvestResult};
use crate::reconcile::Reconciler;
use crate::types::Classification;

/// Owns the ledger for one browser session, and the model folded from it.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    ledger: ResponseLedger,
    reconciler: Reconciler,
    cache: Option<DebugCache>,
    scope: Option<CacheScope>,
}

impl ResponseCollector {
    pub fn new(cache: Option<DebugCache>) -> Self {
        Self {
            ledger: ResponseLedger::new(),
            reconciler: Reconciler::new(),
            cache,
            scope: None,
        }
    }

    pub fn ledger(&self) -> &ResponseLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ResponseLedger {
        &mut self.ledger
    }

    /// Reconcile the ledger, applying only entries captured since the last
    /// call.
    pub fn reconcile(&mut self, decoder: &dyn PayloadDecoder) -> HarvestResult<&Workbook> {
        self.reconciler.model(&self.ledger, decoder)
    }

    /// Set the key under which debug copies are written.
    pub fn set_scope(&mut self, scope: Option<CacheScope>) {
        self.scope = scope;
    }

    pub fn scope(&self) -> Option<&CacheScope> {
        self.scope.as_ref()
    }

    /// Take everything the probe buffered and append it to the ledger.
    ///
    /// Returns the set of classifications seen in this drain.
    pub async fn drain_new_responses(
        &mut self,
        driver: &mut dyn BrowserDriver,
    ) -> Result<BTreeSet<Classification>, DriverError> {
        let entries = driver.drain_probe().await?;
        Ok(self.ingest(entries))
    }

    /// Classify and append already-drained entries.
    pub fn ingest(&mut self, entries: Vec<ProbeEntry>) -> BTreeSet<Classification> {
        let mut found = BTreeSet::new();

        for entry in entries {
            let Some(classification) = classify(&entry) else {
                warn!(
                    tag = entry.classification.as_deref().unwrap_or(""),
                    url = entry.url.as_deref().unwrap_or(""),
                    "Dropping unclassifiable probe entry"
                );
                continue;
            };
            let payload = entry.raw_response_text.unwrap_or_default();

            if let (Some(cache), Some(scope)) = (&self.cache, &self.scope) {
                match cache.write(scope, classification, &payload) {
                    Ok(path) => debug!(path = %path.display(), "Cached raw payload"),
                    Err(e) => warn!(%classification, "Failed to cache raw payload: {e}"),
                }
            }

            let index = self.ledger.push(classification, payload);
            info!(%classification, index, "Response captured");
            found.insert(classification);
        }

        found
    }
}

/// Trust the probe's tag, fall back to the URL pattern table.
fn classify(entry: &ProbeEntry) -> Option<Classification> {
    entry
        .classification
        .as_deref()
        .and_then(Classification::from_tag)
        .or_else(|| entry.url.as_deref().and_then(Classification::from_url))
}
