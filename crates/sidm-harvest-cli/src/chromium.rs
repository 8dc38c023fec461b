//! Chromium-backed browser driver using chromiumoxide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, RemoveScriptToEvaluateOnNewDocumentParams,
    ScriptIdentifier, SetBypassCspParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sidm_harvest::{BrowserDriver, DriverError, ElementAction, Locator, SessionFactory};

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Browsers looked up on `PATH`, in order.
const SYSTEM_BROWSERS: [&str; 3] = ["google-chrome", "chromium", "chromium-browser"];

const MACOS_APP: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

/// Builds installed under `~/.sidm-harvest/chromium`.
fn installed_builds() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
        ]
    } else {
        &["chrome-linux64/chrome"]
    }
}

/// Locate a Chromium executable.
///
/// An explicit path is taken as given. Otherwise the first existing of
/// `SIDM_CHROMIUM_PATH`, an installed build, a browser on `PATH` and the
/// macOS application bundle wins.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let from_env = std::env::var_os("SIDM_CHROMIUM_PATH").map(PathBuf::from);
    let installed = dirs::home_dir().into_iter().flat_map(|home| {
        let root = home.join(".sidm-harvest").join("chromium");
        installed_builds().iter().map(move |build| root.join(build))
    });
    let on_path = SYSTEM_BROWSERS
        .iter()
        .filter_map(|name| which::which(name).ok());
    let app = cfg!(target_os = "macos").then(|| PathBuf::from(MACOS_APP));

    first_existing(from_env.into_iter().chain(installed).chain(on_path).chain(app))
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.exists())
}

/// Launches one Chromium process per session.
#[derive(Debug, Clone)]
pub struct ChromiumFactory {
    executable: PathBuf,
    headless: bool,
    navigation_timeout: Duration,
}

impl ChromiumFactory {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            headless: true,
            navigation_timeout: Duration::from_secs(120),
        }
    }

    /// Show the browser window.
    pub fn headful(mut self) -> Self {
        self.headless = false;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    fn browser_config(&self) -> Result<BrowserConfig, DriverError> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--ignore-certificate-errors");
        builder = if self.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        builder
            .build()
            .map_err(|e| DriverError::Browser(format!("failed to build browser config: {e}")))
    }
}

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| DriverError::Browser(format!("failed to launch Chromium: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        page.execute(SetBypassCspParams::new(true))
            .await
            .map_err(browser_error)?;

        debug!(executable = %self.executable.display(), "Chromium launched");
        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            handler_task,
            probe: None,
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

/// A single Chromium page driving the viz.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    probe: Option<ScriptIdentifier>,
    navigation_timeout: Duration,
}

fn browser_error(e: chromiumoxide::error::CdpError) -> DriverError {
    DriverError::Browser(e.to_string())
}

impl ChromiumDriver {
    /// Run a locator script and return its result object.
    async fn run(&mut self, locator: &Locator, action: ElementAction<'_>) -> Result<Value, DriverError> {
        self.evaluate(&locator.script(action)).await
    }

    /// Run a locator script that must find its element.
    async fn act(&mut self, locator: &Locator, action: ElementAction<'_>) -> Result<Value, DriverError> {
        let result = self.run(locator, action).await?;
        if !found(&result) {
            return Err(DriverError::ElementNotFound(locator.to_string()));
        }
        Ok(result)
    }
}

fn found(result: &Value) -> bool {
    result.get("found").and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn install_probe(&mut self, script: &str) -> Result<(), DriverError> {
        if let Some(previous) = self.probe.take() {
            self.page
                .execute(RemoveScriptToEvaluateOnNewDocumentParams::new(previous))
                .await
                .map_err(browser_error)?;
        }
        let added = self
            .page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(browser_error)?;
        self.probe = Some(added.result.identifier.clone());
        debug!("Response probe registered");
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let timeout_ms = self.navigation_timeout.as_millis() as u64;
        let loaded = tokio::time::timeout(self.navigation_timeout, async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        match loaded {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DriverError::Navigation(format!("{url}: {e}"))),
            Err(_) => Err(DriverError::Navigation(format!(
                "{url}: timed out after {timeout_ms}ms"
            ))),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, DriverError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| DriverError::Script(format!("failed to convert JS result: {e:?}")))
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if found(&self.run(locator, ElementAction::Probe).await?) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::ElementTimeout {
                    selector: locator.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        self.act(locator, ElementAction::Click).await.map(|_| ())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        self.act(locator, ElementAction::Fill(value)).await.map(|_| ())
    }

    async fn press(&mut self, locator: &Locator, key: &str) -> Result<(), DriverError> {
        self.act(locator, ElementAction::Press(key)).await.map(|_| ())
    }

    async fn text_content(&mut self, locator: &Locator) -> Result<Option<String>, DriverError> {
        let result = self.run(locator, ElementAction::Text).await?;
        Ok(result.get("text").and_then(Value::as_str).map(String::from))
    }

    async fn all_text_contents(&mut self, locator: &Locator) -> Result<Vec<String>, DriverError> {
        let result = self.run(locator, ElementAction::AllTexts).await?;
        Ok(result
            .get("texts")
            .and_then(Value::as_array)
            .map(|texts| {
                texts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<(), DriverError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(full_page).build(), path)
            .await
            .map_err(browser_error)?;
        info!(path = %path.display(), "Screenshot saved");
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), DriverError> {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {e}");
        }
        self.handler_task.abort();
        debug!("Browser session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_chromium_path_wins() {
        let path = PathBuf::from("/opt/custom/chrome");
        assert_eq!(find_chromium(Some(&path)), Some(path));
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let chrome = dir.path().join("chrome");
        std::fs::write(&chrome, "").unwrap();

        let found = first_existing([
            dir.path().join("missing"),
            chrome.clone(),
            dir.path().to_path_buf(),
        ]);
        assert_eq!(found, Some(chrome));
        assert_eq!(first_existing([dir.path().join("missing")]), None);
    }

    #[test]
    fn test_found_reads_flag() {
        assert!(found(&serde_json::json!({ "found": true })));
        assert!(!found(&serde_json::json!({ "found": false })));
        assert!(!found(&serde_json::json!(null)));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_locator_actions() {
        let executable = find_chromium(None).expect("Chromium not found");
        let mut driver = ChromiumFactory::new(executable)
            .open()
            .await
            .expect("failed to open session");

        driver
            .navigate("data:text/html,<input id='q'><ul><li>Uno</li><li>Dos</li></ul>")
            .await
            .expect("navigation failed");

        let input = Locator::new("#q");
        driver
            .wait_for(&input, Duration::from_secs(5))
            .await
            .expect("input not found");
        driver.fill(&input, "01001").await.expect("fill failed");
        let value = driver
            .evaluate("document.querySelector('#q').value")
            .await
            .expect("evaluate failed");
        assert_eq!(value, "01001");

        let items = driver
            .all_text_contents(&Locator::new("li"))
            .await
            .expect("texts failed");
        assert_eq!(items, vec!["Uno", "Dos"]);

        let missing = driver
            .wait_for(&Locator::new("#nope"), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(missing.is_missing_element());

        driver.close().await.expect("close failed");
    }
}
