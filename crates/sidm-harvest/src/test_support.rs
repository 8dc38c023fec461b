//! In-process fakes of the browser, the visualization and the decoder.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::capture::ProbeEntry;
use crate::config::Selectors;
use crate::decoder::{PayloadDecoder, Row, Workbook, WorksheetData};
use crate::driver::{BrowserDriver, Locator, SessionFactory};
use crate::error::{DecodeError, DriverError};
use crate::types::{Classification, GeographyMode, Screen, Tab, URL_PATTERNS};

// ─── payloads ───

/// Worksheet with string cells; `rows[i][j]` is the cell of `columns[j]`.
pub fn sheet(name: &str, columns: &[&str], rows: &[&[&str]]) -> WorksheetData {
    WorksheetData {
        name: name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|cells| {
                columns
                    .iter()
                    .zip(cells.iter())
                    .map(|(c, v)| (c.to_string(), json!(v)))
                    .collect::<Row>()
            })
            .collect(),
    }
}

/// Payload understood by [`FakeDecoder`].
pub fn payload(sheets: &[WorksheetData]) -> String {
    json!({ "worksheets": sheets }).to_string()
}

#[derive(Deserialize)]
struct FakePayload {
    worksheets: Vec<WorksheetData>,
}

/// Decodes [`payload`] documents; an update replaces every worksheet.
pub struct FakeDecoder;

impl PayloadDecoder for FakeDecoder {
    fn decode(&self, bootstrap: &str) -> Result<Workbook, DecodeError> {
        let parsed: FakePayload = serde_json::from_str(bootstrap)?;
        Ok(Workbook {
            worksheets: parsed.worksheets,
            ..Workbook::default()
        })
    }

    fn apply_update(&self, model: &Workbook, update: &str) -> Result<Workbook, DecodeError> {
        let parsed: FakePayload = serde_json::from_str(update)?;
        Ok(Workbook {
            worksheets: parsed.worksheets,
            dictionary: model.dictionary.clone(),
        })
    }
}

/// [`FakeDecoder`] that counts its calls; clones share the counters.
#[derive(Clone, Default)]
pub struct CountingDecoder {
    decodes: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl CountingDecoder {
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl PayloadDecoder for CountingDecoder {
    fn decode(&self, bootstrap: &str) -> Result<Workbook, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        FakeDecoder.decode(bootstrap)
    }

    fn apply_update(&self, model: &Workbook, update: &str) -> Result<Workbook, DecodeError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        FakeDecoder.apply_update(model, update)
    }
}

// ─── visualization ───

/// What the fake page currently shows.
#[derive(Debug, Clone, Default)]
pub struct VizView {
    pub tab: Option<String>,
    pub marker: Option<String>,
    pub variable: Option<String>,
}

impl VizView {
    /// Province code shown by the region filter.
    pub fn region_code(&self) -> String {
        self.marker
            .as_deref()
            .map(|m| m.chars().take(2).collect())
            .unwrap_or_default()
    }

    pub fn screen(&self) -> Option<(Screen, GeographyMode)> {
        self.tab.as_deref().and_then(Tab::from_label).and_then(Tab::screen)
    }
}

/// Payload emitted for a classification; `None` keeps the call silent.
pub type Render = Arc<dyn Fn(&VizView, Classification) -> Option<String> + Send + Sync>;

/// One row per view: value `"<variable>@<region>"` for municipality
/// `"<region>001"`, on the sheet of the shown tab.
pub fn standard_render(view: &VizView, _class: Classification) -> Option<String> {
    let Some((screen, mode)) = view.screen() else {
        return Some(payload(&[]));
    };
    let columns = screen.columns();
    let code = view.region_code();
    let value = format!("{}@{code}", view.variable.clone().unwrap_or_default());
    let municipality = format!("{code}001");
    Some(payload(&[sheet(
        &screen.sheet_name(mode),
        &[columns.label, columns.municipality],
        &[&[value.as_str(), municipality.as_str()]],
    )]))
}

/// Everything the fake observed, shared with the test.
#[derive(Debug, Default)]
pub struct VizLog {
    pub navigations: Vec<String>,
    pub probe_installs: usize,
    pub clicks: Vec<String>,
    pub screenshots: Vec<PathBuf>,
    pub closed: usize,
}

/// Simulated workbook page implementing [`BrowserDriver`].
pub struct FakeViz {
    pub drain_calls: usize,
    pub initial_tab: String,
    /// Province codes the region search can find; empty means all.
    pub known_regions: Vec<String>,
    pub variables: Vec<String>,
    /// Variable shown after a load; defaults to the first of `variables`.
    pub initial_variable: Option<String>,
    pub fail_navigation: bool,
    selectors: Selectors,
    render: Render,
    silent: BTreeSet<Classification>,
    scheduled: VecDeque<Vec<ProbeEntry>>,
    buffer: Vec<ProbeEntry>,
    log: Arc<Mutex<VizLog>>,
    view: VizView,
    cookie_banner: bool,
    filter_open: bool,
    search: String,
    menu_open: bool,
}

impl FakeViz {
    pub fn new() -> Self {
        Self::with_variables(&["Población", "Densidad", "Edad media"])
    }

    pub fn with_variables(variables: &[&str]) -> Self {
        Self {
            drain_calls: 0,
            initial_tab: Tab::B1DemograficoCcaa.label().to_string(),
            known_regions: Vec::new(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
            initial_variable: None,
            fail_navigation: false,
            selectors: Selectors::default(),
            render: Arc::new(standard_render),
            silent: BTreeSet::new(),
            scheduled: VecDeque::new(),
            buffer: Vec::new(),
            log: Arc::new(Mutex::new(VizLog::default())),
            view: VizView::default(),
            cookie_banner: false,
            filter_open: false,
            search: String::new(),
            menu_open: false,
        }
    }

    pub fn entry(classification: Classification, body: &str) -> ProbeEntry {
        let pattern = URL_PATTERNS
            .iter()
            .find(|(_, c)| *c == classification)
            .map(|(p, _)| *p)
            .unwrap_or_default();
        ProbeEntry {
            classification: Some(classification.tag().to_string()),
            raw_response_text: Some(body.to_string()),
            url: Some(format!("https://public.tableau.com/vizql/{pattern}")),
        }
    }

    /// Return `entries` from the next drain instead of the page buffer.
    pub fn schedule_drain(&mut self, entries: Vec<ProbeEntry>) {
        self.scheduled.push_back(entries);
    }

    pub fn silence(&mut self, classification: Classification) {
        self.silent.insert(classification);
    }

    pub fn set_render(&mut self, render: Render) {
        self.render = render;
    }

    pub fn share_log(&mut self, log: Arc<Mutex<VizLog>>) {
        self.log = log;
    }

    pub fn log(&self) -> Arc<Mutex<VizLog>> {
        self.log.clone()
    }

    fn emit(&mut self, classification: Classification) {
        if self.silent.contains(&classification) {
            return;
        }
        if let Some(body) = (self.render)(&self.view, classification) {
            self.buffer.push(Self::entry(classification, &body));
        }
    }

    fn option_query<'a>(&self, css: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.selectors.region_option.split_once("{code}")?;
        css.strip_prefix(prefix)?.strip_suffix(suffix)
    }

    fn region_known(&self, query: &str) -> bool {
        self.known_regions.is_empty()
            || self.known_regions.iter().any(|r| query.starts_with(r.as_str()))
    }

    fn matches(&self, locator: &Locator) -> bool {
        let s = &self.selectors;
        let css = locator.css.as_str();
        let loaded = self.view.tab.is_some();

        if css == s.active_tab {
            loaded
        } else if css == s.inactive_tab {
            match &locator.text {
                Some(text) => {
                    Tab::from_label(text).is_some() && self.view.tab.as_deref() != Some(text.as_str())
                }
                None => loaded,
            }
        } else if css == s.region_combo || css == s.variable_open || css == "body" {
            loaded
        } else if css == s.region_search {
            self.filter_open
        } else if let Some(query) = self.option_query(css) {
            self.filter_open && self.search == query && self.region_known(query)
        } else if css == s.variable_current {
            self.view.variable.is_some()
        } else if css == s.variable_item {
            self.menu_open
                && match &locator.text {
                    Some(text) => self.variables.contains(text),
                    None => !self.variables.is_empty(),
                }
        } else if css == s.cookie_accept {
            self.cookie_banner
        } else {
            false
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeViz {
    async fn install_probe(&mut self, _script: &str) -> Result<(), DriverError> {
        self.log.lock().unwrap().probe_installs += 1;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        if self.fail_navigation {
            return Err(DriverError::Browser("target crashed".to_string()));
        }
        self.log.lock().unwrap().navigations.push(url.to_string());
        let tab = if url.ends_with("_Provincial") {
            Tab::B1DemograficoProvincial.label().to_string()
        } else {
            self.initial_tab.clone()
        };
        self.view = VizView {
            tab: Some(tab),
            marker: Some("01001 Alegría-Dulantzi".to_string()),
            variable: self
                .initial_variable
                .clone()
                .or_else(|| self.variables.first().cloned()),
        };
        self.buffer.clear();
        self.cookie_banner = true;
        self.filter_open = false;
        self.menu_open = false;
        self.emit(Classification::Bootstrap);
        self.emit(Classification::FirstRender);
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value, DriverError> {
        Ok(Value::Null)
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<(), DriverError> {
        if self.matches(locator) {
            Ok(())
        } else {
            Err(DriverError::ElementTimeout {
                selector: locator.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        if !self.matches(locator) {
            return Err(DriverError::ElementNotFound(locator.to_string()));
        }
        self.log.lock().unwrap().clicks.push(locator.to_string());

        let css = locator.css.clone();
        let s = self.selectors.clone();
        if css == s.inactive_tab {
            self.view.tab = locator.text.clone();
            self.view.variable = self.variables.first().cloned();
            self.emit(Classification::LayoutChange);
            self.emit(Classification::FirstRender);
        } else if css == s.region_combo {
            self.filter_open = true;
        } else if self.option_query(&css).is_some() {
            self.view.marker = Some(format!("{} Municipio", self.search));
            self.filter_open = false;
            self.emit(Classification::CategoricalFilter);
        } else if css == s.variable_open {
            self.menu_open = !self.menu_open;
        } else if css == s.variable_item {
            self.view.variable = locator.text.clone();
            self.menu_open = false;
            self.emit(Classification::ParameterSet);
        } else if css == s.cookie_accept {
            self.cookie_banner = false;
        }
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        if !self.matches(locator) {
            return Err(DriverError::ElementNotFound(locator.to_string()));
        }
        if locator.css == self.selectors.region_search {
            self.search = value.to_string();
        }
        Ok(())
    }

    async fn press(&mut self, _locator: &Locator, key: &str) -> Result<(), DriverError> {
        if key == "Escape" {
            self.menu_open = false;
        }
        Ok(())
    }

    async fn text_content(&mut self, locator: &Locator) -> Result<Option<String>, DriverError> {
        let s = &self.selectors;
        Ok(if locator.css == s.active_tab {
            self.view.tab.clone()
        } else if locator.css == s.region_combo {
            self.view.marker.clone()
        } else if locator.css == s.variable_current {
            self.view.variable.clone()
        } else {
            None
        })
    }

    async fn all_text_contents(&mut self, locator: &Locator) -> Result<Vec<String>, DriverError> {
        if locator.css == self.selectors.variable_item && self.menu_open {
            Ok(self.variables.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn screenshot(&mut self, path: &Path, _full_page: bool) -> Result<(), DriverError> {
        self.log.lock().unwrap().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn drain_probe(&mut self) -> Result<Vec<ProbeEntry>, DriverError> {
        self.drain_calls += 1;
        match self.scheduled.pop_front() {
            Some(entries) => Ok(entries),
            None => Ok(std::mem::take(&mut self.buffer)),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Opens a fresh [`FakeViz`] per session, all sharing one log.
pub struct FakeFactory {
    build: Box<dyn Fn(usize) -> FakeViz + Send + Sync>,
    pub opened: AtomicUsize,
    pub log: Arc<Mutex<VizLog>>,
}

impl FakeFactory {
    /// `build` receives the zero-based session number.
    pub fn new(build: impl Fn(usize) -> FakeViz + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            opened: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(VizLog::default())),
        }
    }

    pub fn sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        let mut viz = (self.build)(n);
        viz.share_log(self.log.clone());
        Ok(Box::new(viz))
    }
}
