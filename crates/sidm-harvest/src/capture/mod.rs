//! Response capture: the in-page probe contract, the ledger of classified
//! responses, and the collector that drains one into the other.

pub mod cache;
pub mod collector;
pub mod ledger;
pub mod probe;

pub use cache::{CacheScope, DebugCache};
pub use collector::ResponseCollector;
pub use ledger::{CapturedResponse, ResponseLedger};
pub use probe::{drain_script, probe_script, ProbeEntry};
