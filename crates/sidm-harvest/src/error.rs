//! Error taxonomy for harvesting runs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Classification;

/// Failures raised by a browser driver implementation.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("Element not found within {timeout_ms}ms: {selector}")]
    ElementTimeout { selector: String, timeout_ms: u64 },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Whether the error means a UI element was missing, as opposed to the
    /// browser itself misbehaving.
    pub fn is_missing_element(&self) -> bool {
        matches!(
            self,
            DriverError::ElementTimeout { .. } | DriverError::ElementNotFound(_)
        )
    }
}

/// Failures decoding a vendor presentation-model payload.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Malformed payload framing: {0}")]
    Framing(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid payload: {0}")]
    Invalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the persistence adapter.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Stable category of a unit failure, stored alongside the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Navigation,
    VariableNotFound,
    NoBootstrap,
    NoWorksheetsAfterLoad,
    NoVariableProcessed,
    VariableNotInList,
    Decode,
    Driver,
    Persistence,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Timeout,
        ErrorKind::Navigation,
        ErrorKind::VariableNotFound,
        ErrorKind::NoBootstrap,
        ErrorKind::NoWorksheetsAfterLoad,
        ErrorKind::NoVariableProcessed,
        ErrorKind::VariableNotInList,
        ErrorKind::Decode,
        ErrorKind::Driver,
        ErrorKind::Persistence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Navigation => "navigation",
            ErrorKind::VariableNotFound => "variable_not_found",
            ErrorKind::NoBootstrap => "no_bootstrap",
            ErrorKind::NoWorksheetsAfterLoad => "no_worksheets_after_load",
            ErrorKind::NoVariableProcessed => "no_variable_processed",
            ErrorKind::VariableNotInList => "variable_not_in_list",
            ErrorKind::Decode => "decode",
            ErrorKind::Driver => "driver",
            ErrorKind::Persistence => "persistence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All errors that can occur while harvesting a unit.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Timeout after {waited_secs}s waiting for responses: {}", format_pending(.pending))]
    Timeout {
        pending: BTreeSet<Classification>,
        waited_secs: u64,
    },

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Variable not found in dropdown: {0}")]
    VariableNotFound(String),

    #[error("Expected exactly one bootstrap response, found {found}")]
    NoBootstrap { found: usize },

    #[error("No worksheets after load: {0}")]
    NoWorksheetsAfterLoad(String),

    #[error("No variable processed: worksheet {0} missing from workbook")]
    NoVariableProcessed(String),

    #[error("Selected variable {0:?} is not pending in the enumerated list")]
    VariableNotInList(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Driver error: {0}")]
    Driver(DriverError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

fn format_pending(pending: &BTreeSet<Classification>) -> String {
    pending
        .iter()
        .map(|c| c.tag())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<DriverError> for HarvestError {
    fn from(e: DriverError) -> Self {
        if e.is_missing_element() || matches!(e, DriverError::Navigation(_)) {
            HarvestError::Navigation(e.to_string())
        } else {
            HarvestError::Driver(e)
        }
    }
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Timeout { .. } => ErrorKind::Timeout,
            HarvestError::Navigation(_) => ErrorKind::Navigation,
            HarvestError::VariableNotFound(_) => ErrorKind::VariableNotFound,
            HarvestError::NoBootstrap { .. } => ErrorKind::NoBootstrap,
            HarvestError::NoWorksheetsAfterLoad(_) => ErrorKind::NoWorksheetsAfterLoad,
            HarvestError::NoVariableProcessed(_) => ErrorKind::NoVariableProcessed,
            HarvestError::VariableNotInList(_) => ErrorKind::VariableNotInList,
            HarvestError::Decode(_) => ErrorKind::Decode,
            HarvestError::Driver(_) => ErrorKind::Driver,
            HarvestError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether the failure is scoped to the current unit. Anything else
    /// aborts the whole run.
    pub fn is_unit_failure(&self) -> bool {
        !matches!(self, HarvestError::Driver(_) | HarvestError::Persistence(_))
    }

    /// Whether a retry at finer geographic granularity may succeed.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(self, HarvestError::NoWorksheetsAfterLoad(_))
    }
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_element_becomes_navigation_error() {
        let err: HarvestError = DriverError::ElementTimeout {
            selector: "div#tabs".into(),
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert!(err.is_unit_failure());
    }

    #[test]
    fn test_page_load_failure_is_unit_scoped() {
        let err: HarvestError = DriverError::Navigation("net::ERR_TIMED_OUT".into()).into();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert!(err.is_unit_failure());
    }

    #[test]
    fn test_browser_failure_aborts_run() {
        let err: HarvestError = DriverError::Browser("websocket closed".into()).into();
        assert_eq!(err.kind(), ErrorKind::Driver);
        assert!(!err.is_unit_failure());
    }

    #[test]
    fn test_timeout_message_lists_pending() {
        let err = HarvestError::Timeout {
            pending: [Classification::FirstRender, Classification::Bootstrap]
                .into_iter()
                .collect(),
            waited_secs: 120,
        };
        assert_eq!(
            err.to_string(),
            "Timeout after 120s waiting for responses: bootstrap, first_render"
        );
    }

    #[test]
    fn test_error_kind_parse() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }
}
