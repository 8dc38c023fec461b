//! Navigation state machine.
//!
//! The [`Navigator`] owns one browser session, its response collector and the
//! believed UI state. Each transition acts on the page, resets the ledger as
//! the transition requires, then blocks on the coordinator until the
//! visualization has answered.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::capture::{probe_script, ResponseCollector};
use crate::config::{HarvestConfig, ScreenReset};
use crate::coordinator;
use crate::driver::{BrowserDriver, Locator};
use crate::error::{DriverError, HarvestError, HarvestResult};
use crate::types::{Classification, GeographyMode, Screen, Tab};

/// Last transition the navigator completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavState {
    /// No page loaded yet.
    Unloaded,
    AtGeographyMode(GeographyMode),
    AtScreen(Screen),
    AtRegion(String),
    AtVariable(String),
}

/// Drives one browser session through the workbook.
pub struct Navigator {
    driver: Box<dyn BrowserDriver>,
    collector: ResponseCollector,
    config: HarvestConfig,
    state: NavState,
    mode: Option<GeographyMode>,
    screen: Option<Screen>,
    region: Option<String>,
}

impl Navigator {
    pub fn new(driver: Box<dyn BrowserDriver>, collector: ResponseCollector, config: HarvestConfig) -> Self {
        Self {
            driver,
            collector,
            config,
            state: NavState::Unloaded,
            mode: None,
            screen: None,
            region: None,
        }
    }

    pub fn state(&self) -> &NavState {
        &self.state
    }

    pub fn mode(&self) -> Option<GeographyMode> {
        self.mode
    }

    pub fn screen(&self) -> Option<Screen> {
        self.screen
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn collector(&self) -> &ResponseCollector {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut ResponseCollector {
        &mut self.collector
    }

    fn locator(&self, css: &str) -> Locator {
        Locator::new(css).in_frame(self.config.selectors.frame.clone())
    }

    async fn wait_for_set(&mut self, required: &[Classification]) -> HarvestResult<()> {
        coordinator::wait_for_set(
            self.driver.as_mut(),
            &mut self.collector,
            required,
            self.config.wait_options(),
        )
        .await
    }

    /// Load the base URL of `mode` unless it is already loaded.
    pub async fn switch_mode(&mut self, mode: GeographyMode) -> HarvestResult<()> {
        if self.mode == Some(mode) {
            return Ok(());
        }

        let url = self.config.url_for(mode).to_string();
        info!(%mode, %url, "Loading workbook");
        self.driver.install_probe(&probe_script()).await?;
        self.driver.navigate(&url).await?;
        self.collector.ledger_mut().reset_full();
        self.mode = None;
        self.screen = None;
        self.region = None;

        self.wait_for_set(&[Classification::Bootstrap, Classification::FirstRender])
            .await?;
        self.dismiss_cookies().await;

        self.mode = Some(mode);
        self.state = NavState::AtGeographyMode(mode);
        Ok(())
    }

    async fn dismiss_cookies(&mut self) {
        let button = Locator::new(self.config.selectors.cookie_accept.clone());
        let timeout = self.config.element_timeout();
        let result = match self.driver.wait_for(&button, timeout).await {
            Ok(()) => self.driver.click(&button).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!("Cookie banner dismissed"),
            Err(e) if e.is_missing_element() => debug!("No cookie banner"),
            Err(e) => warn!("Failed to dismiss cookie banner: {e}"),
        }
    }

    /// Text of the selected tab, parsed.
    pub async fn current_tab(&mut self) -> HarvestResult<Tab> {
        let active = self.locator(&self.config.selectors.active_tab);
        self.driver
            .wait_for(&active, self.config.element_timeout())
            .await?;
        let label = self
            .driver
            .text_content(&active)
            .await?
            .ok_or_else(|| HarvestError::Navigation("selected tab has no text".to_string()))?;
        Tab::from_label(&label)
            .ok_or_else(|| HarvestError::Navigation(format!("unknown tab {:?}", label.trim())))
    }

    /// Show `screen` in the loaded geography mode.
    pub async fn move_to_screen(&mut self, screen: Screen) -> HarvestResult<()> {
        let mode = self.mode.ok_or_else(|| {
            HarvestError::Navigation("no workbook loaded before screen change".to_string())
        })?;
        let target = screen.tab(mode);
        let current = self.current_tab().await?;

        if current != target {
            info!(from = current.label(), to = target.label(), "Changing tab");
            match self.config.screen_reset {
                ScreenReset::BootstrapOnly => self.collector.ledger_mut().retain_bootstrap(),
                ScreenReset::Full => self.collector.ledger_mut().reset_full(),
            }

            let tab = self
                .locator(&self.config.selectors.inactive_tab)
                .with_text(target.label())
                .parent();
            self.driver.wait_for(&tab, self.config.element_timeout()).await?;
            self.driver.click(&tab).await?;
            self.region = None;
            self.wait_for_set(&[Classification::LayoutChange, Classification::FirstRender])
                .await?;
        }

        self.screen = Some(screen);
        self.state = NavState::AtScreen(screen);
        Ok(())
    }

    /// Filter the map to the province `code`.
    pub async fn move_to_region(&mut self, code: &str) -> HarvestResult<()> {
        let combo = self.locator(&self.config.selectors.region_combo);
        self.driver
            .wait_for(&combo, self.config.element_timeout())
            .await?;
        let marker = self.driver.text_content(&combo).await?.unwrap_or_default();
        let current: String = marker.trim().chars().take(2).collect();

        if current != code {
            info!(from = %current, to = %code, "Changing region");
            self.driver.click(&combo).await?;

            let search = self.locator(&self.config.selectors.region_search);
            self.driver
                .wait_for(&search, self.config.element_timeout())
                .await?;
            let query = format!("{code}001");
            self.driver.fill(&search, &query).await?;

            let option = self.locator(&self.config.selectors.region_option_for(&query));
            self.driver
                .wait_for(&option, self.config.region_option_timeout())
                .await?;
            self.driver.click(&option).await?;
            self.wait_for_set(&[Classification::CategoricalFilter]).await?;
        }

        self.region = Some(code.to_string());
        self.state = NavState::AtRegion(code.to_string());
        Ok(())
    }

    /// Every entry of the variable dropdown, in the control's order.
    pub async fn read_variables(&mut self) -> HarvestResult<Vec<String>> {
        let open = self.locator(&self.config.selectors.variable_open);
        self.driver.wait_for(&open, self.config.element_timeout()).await?;
        self.driver.click(&open).await?;

        let items = self.locator(&self.config.selectors.variable_item);
        let variables = match self.driver.wait_for(&items, self.config.element_timeout()).await {
            Ok(()) => self.driver.all_text_contents(&items).await?,
            Err(e) if e.is_missing_element() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let body = self.locator("body");
        self.driver.press(&body, "Escape").await?;
        let variables: Vec<String> = variables.into_iter().filter(|v| !v.is_empty()).collect();
        info!(count = variables.len(), "Read variable list");
        Ok(variables)
    }

    /// The variable the parameter control currently shows.
    pub async fn current_variable(&mut self) -> HarvestResult<String> {
        let current = self.locator(&self.config.selectors.variable_current);
        self.driver
            .wait_for(&current, self.config.element_timeout())
            .await?;
        self.driver
            .text_content(&current)
            .await?
            .map(|v| v.trim().to_string())
            .ok_or_else(|| HarvestError::Navigation("parameter control has no text".to_string()))
    }

    /// Pick `name` from the variable dropdown.
    pub async fn select_variable(&mut self, name: &str) -> HarvestResult<()> {
        let open = self.locator(&self.config.selectors.variable_open);
        self.driver.wait_for(&open, self.config.element_timeout()).await?;
        self.driver.click(&open).await?;

        let item = self
            .locator(&self.config.selectors.variable_item)
            .with_text(name)
            .parent();
        match self.driver.wait_for(&item, self.config.element_timeout()).await {
            Ok(()) => {}
            Err(e) if e.is_missing_element() => {
                return Err(HarvestError::VariableNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(variable = %name, "Selecting variable");
        self.driver.click(&item).await?;
        self.wait_for_set(&[Classification::ParameterSet]).await?;
        self.state = NavState::AtVariable(name.to_string());
        Ok(())
    }

    pub async fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        self.driver.screenshot(path, true).await
    }

    /// Release the browser session.
    pub async fn close(self) -> Result<(), DriverError> {
        self.driver.close().await
    }
}
