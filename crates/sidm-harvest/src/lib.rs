//! sidm-harvest: drives the SIDM Tableau workbook through a browser,
//! captures its internal responses and rebuilds the workbook's data model to
//! harvest every variable of every municipality.
//!
//! The browser, payload format and storage are reached through the
//! [`BrowserDriver`], [`PayloadDecoder`] and [`Persistence`] traits.

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod navigation;
pub mod orchestrator;
pub mod persistence;
pub mod reconcile;
pub mod text;
pub mod types;
pub mod variables;

#[cfg(test)]
pub(crate) mod test_support;

pub use capture::{CapturedResponse, DebugCache, ResponseCollector, ResponseLedger};
pub use config::{FallbackPolicy, HarvestConfig, ScreenReset, Selectors};
pub use coordinator::{wait_for_set, WaitOptions};
pub use decoder::{PayloadDecoder, TableauDecoder, Workbook, WorksheetData};
pub use driver::{BrowserDriver, ElementAction, Locator, SessionFactory};
pub use error::{DecodeError, DriverError, ErrorKind, HarvestError, HarvestResult, PersistenceError};
pub use navigation::{NavState, Navigator};
pub use orchestrator::{plan_targets, Orchestrator, RunReport};
pub use persistence::{MemoryStore, Persistence, UnitStatus, WorkUnit};
pub use reconcile::{reconcile, Reconciler};
pub use text::fix_mojibake;
pub use types::*;
pub use variables::{extract, harvest_variables, VariableReport};
