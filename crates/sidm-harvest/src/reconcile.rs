//! Folds the response ledger into a single workbook model.

use tracing::debug;

use crate::capture::{CapturedResponse, ResponseLedger};
use crate::decoder::{PayloadDecoder, Workbook};
use crate::error::{HarvestError, HarvestResult};
use crate::types::Classification;

/// Decode the bootstrap entry, then apply every other entry in arrival order.
///
/// A `first_render` update that leaves the model without worksheets is
/// ignored; every other update replaces the running model. Pure in
/// `(ledger, decoder)`.
pub fn reconcile(ledger: &ResponseLedger, decoder: &dyn PayloadDecoder) -> HarvestResult<Workbook> {
    Reconciler::new().model(ledger, decoder).cloned()
}

/// Incremental [`reconcile`] over one ledger.
///
/// Keeps the folded model between calls and applies only the entries
/// appended since the previous call. A reset of the ledger, or a failed
/// update, discards the fold so the next call starts again from the
/// bootstrap.
#[derive(Debug, Default)]
pub struct Reconciler {
    fold: Option<Fold>,
}

#[derive(Debug)]
struct Fold {
    generation: u64,
    /// Ledger positions already applied.
    consumed: usize,
    model: Workbook,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The model of `ledger` as it stands now.
    pub fn model(
        &mut self,
        ledger: &ResponseLedger,
        decoder: &dyn PayloadDecoder,
    ) -> HarvestResult<&Workbook> {
        let bootstrap = match single_bootstrap(ledger) {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                self.fold = None;
                return Err(e);
            }
        };

        let mut fold = match self.fold.take() {
            Some(fold) if fold.generation == ledger.generation() => fold,
            _ => {
                let model = decoder.decode(&bootstrap.raw_payload)?;
                debug!(worksheets = model.len(), "Decoded bootstrap");
                Fold {
                    generation: ledger.generation(),
                    consumed: 0,
                    model,
                }
            }
        };

        for entry in ledger.iter().skip(fold.consumed) {
            if entry.sequence_index == bootstrap.sequence_index {
                continue;
            }
            let merged = decoder.apply_update(&fold.model, &entry.raw_payload)?;
            if entry.classification == Classification::FirstRender && merged.is_empty() {
                debug!(index = entry.sequence_index, "Ignoring empty first_render update");
                continue;
            }
            debug!(
                index = entry.sequence_index,
                classification = %entry.classification,
                worksheets = merged.len(),
                "Applied update"
            );
            fold.model = merged;
        }
        fold.consumed = ledger.len();

        let fold = self.fold.insert(fold);
        if fold.model.is_empty() {
            return Err(HarvestError::NoWorksheetsAfterLoad(format!(
                "{} responses reconciled without a worksheet",
                ledger.len()
            )));
        }
        Ok(&fold.model)
    }
}

fn single_bootstrap(ledger: &ResponseLedger) -> HarvestResult<&CapturedResponse> {
    let bootstraps: Vec<_> = ledger
        .iter()
        .filter(|e| e.classification == Classification::Bootstrap)
        .collect();
    match bootstraps.as_slice() {
        [bootstrap] => Ok(bootstrap),
        _ => Err(HarvestError::NoBootstrap {
            found: bootstraps.len(),
        }),
    }
}
