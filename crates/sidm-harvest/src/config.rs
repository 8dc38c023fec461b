//! Harvest configuration.
//!
//! Every field has a default matching the published workbook, so an empty
//! JSON object is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::WaitOptions;
use crate::types::GeographyMode;

pub const AGGREGATE_URL: &str = "https://public.tableau.com/app/profile/reto.demografico/viz/SistemaIntegradodeDatosMunicipales2023/B1_Demogrfico_CCAA";
pub const PROVINCE_URL: &str = "https://public.tableau.com/app/profile/reto.demografico/viz/SistemaIntegradodeDatosMunicipales2023/B1_Demogrfico_Provincial";

/// Tooltip of the parameter control that picks the block's variable.
pub const VARIABLE_CONTROL_TITLE: &str =
    "Inicia la navegación seleccionando una variable de este Bloque";

/// CSS selectors of the workbook's UI, all resolved inside `frame`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Iframe hosting the visualization.
    pub frame: String,
    /// Text span of the selected tab.
    pub active_tab: String,
    /// Text spans of the unselected tabs.
    pub inactive_tab: String,
    /// Municipality combo box; its text starts with the province code.
    pub region_combo: String,
    pub region_search: String,
    /// Option template; `{code}` is replaced by the searched code.
    pub region_option: String,
    pub variable_current: String,
    pub variable_open: String,
    pub variable_item: String,
    /// Cookie banner accept button, outside the frame.
    pub cookie_accept: String,
}

impl Default for Selectors {
    fn default() -> Self {
        let tab = r#"div#tabs div[wairole="presentation"]"#;
        let inner = r#"div[wairole="presentation"] > div[wairole="presentation"] > span"#;
        let variable_box = format!(
            r#"div.ParameterControlBox:has(div[title="{VARIABLE_CONTROL_TITLE}"]) div.PCContent"#
        );
        Self {
            frame: "div#embedded-viz-wrapper iframe".to_string(),
            active_tab: format!(r#"{tab}[aria-selected="true"] > {inner}"#),
            inactive_tab: format!(r#"{tab}:not([aria-selected="true"]) > {inner}"#),
            region_combo: "div.CategoricalFilterBox span.tabComboBox".to_string(),
            region_search: "div.SearchBox textarea.QueryBox".to_string(),
            region_option: r#"div[id*="Codigo Municipio"] a[title^="{code}"]"#.to_string(),
            variable_current: format!(
                "{variable_box} div.tabComboBoxNameContainer div.tabComboBoxName"
            ),
            variable_open: format!("{variable_box} span.tabComboBox"),
            variable_item: "div.tabMenuContent span.tabMenuItemName".to_string(),
            cookie_accept: "#onetrust-accept-btn-handler".to_string(),
        }
    }
}

impl Selectors {
    pub fn region_option_for(&self, code: &str) -> String {
        self.region_option.replace("{code}", code)
    }
}

/// How much of the ledger a tab change discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenReset {
    /// Keep the bootstrap entry of the current load.
    BootstrapOnly,
    /// Drop everything.
    Full,
}

/// When a unit is retried one province at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    pub enabled: bool,
    /// Failures (of the fallback-eligible kind) before switching.
    pub after_failures: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            after_failures: 2,
        }
    }
}

/// Top-level harvest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub aggregate_url: String,
    pub province_url: String,
    pub wait_deadline_secs: u64,
    pub poll_interval_secs: u64,
    pub element_timeout_ms: u64,
    pub region_option_timeout_ms: u64,
    /// A unit stops being retried once its error count reaches this.
    pub max_errors: u32,
    pub fallback: FallbackPolicy,
    pub screen_reset: ScreenReset,
    /// Pause between units.
    pub unit_pause_secs: u64,
    /// Raw payload copies; disabled when `None`.
    pub cache_dir: Option<PathBuf>,
    pub screenshot_dir: PathBuf,
    pub selectors: Selectors,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            aggregate_url: AGGREGATE_URL.to_string(),
            province_url: PROVINCE_URL.to_string(),
            wait_deadline_secs: 120,
            poll_interval_secs: 3,
            element_timeout_ms: 5_000,
            region_option_timeout_ms: 10_000,
            max_errors: 3,
            fallback: FallbackPolicy::default(),
            screen_reset: ScreenReset::BootstrapOnly,
            unit_pause_secs: 5,
            cache_dir: None,
            screenshot_dir: PathBuf::from("screenshots"),
            selectors: Selectors::default(),
        }
    }
}

impl HarvestConfig {
    pub fn url_for(&self, mode: GeographyMode) -> &str {
        match mode {
            GeographyMode::Aggregate => &self.aggregate_url,
            GeographyMode::Province => &self.province_url,
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            deadline: Duration::from_secs(self.wait_deadline_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn region_option_timeout(&self) -> Duration {
        Duration::from_millis(self.region_option_timeout_ms)
    }

    pub fn unit_pause(&self) -> Duration {
        Duration::from_secs(self.unit_pause_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: HarvestConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HarvestConfig::default());
        assert_eq!(config.wait_options().deadline, Duration::from_secs(120));
        assert_eq!(config.fallback.after_failures, 2);
    }

    #[test]
    fn test_partial_override() {
        let config: HarvestConfig = serde_json::from_str(
            r#"{"max_errors": 5, "fallback": {"enabled": false}, "screen_reset": "full"}"#,
        )
        .unwrap();
        assert_eq!(config.max_errors, 5);
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.after_failures, 2);
        assert_eq!(config.screen_reset, ScreenReset::Full);
    }

    #[test]
    fn test_region_option_template() {
        let selectors = Selectors::default();
        assert_eq!(
            selectors.region_option_for("50001"),
            r#"div[id*="Codigo Municipio"] a[title^="50001"]"#
        );
        assert!(selectors.active_tab.contains(r#"[aria-selected="true"] >"#));
        assert!(selectors.inactive_tab.contains(r#":not([aria-selected="true"])"#));
    }

    #[test]
    fn test_variable_selectors_share_the_titled_control() {
        let selectors = Selectors::default();
        let anchor = format!(
            r#"div.ParameterControlBox:has(div[title="{VARIABLE_CONTROL_TITLE}"])"#
        );
        assert!(selectors.variable_current.starts_with(&anchor));
        assert!(selectors.variable_open.starts_with(&anchor));
        assert!(!selectors.variable_open.contains("ParameterControl_0"));
    }

    #[test]
    fn test_url_for_mode() {
        let config = HarvestConfig::default();
        assert!(config.url_for(GeographyMode::Aggregate).ends_with("_CCAA"));
        assert!(config.url_for(GeographyMode::Province).ends_with("_Provincial"));
    }
}
