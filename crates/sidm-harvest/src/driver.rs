//! Browser driver abstraction.
//!
//! Defines the `BrowserDriver` and `SessionFactory` traits the harvester
//! drives the visualization through. Elements are addressed by a
//! [`Locator`]; implementations resolve locators with [`Locator::script`],
//! which runs inside the page and reaches into the embedded viz frame.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::capture::probe::{self, ProbeEntry};
use crate::error::DriverError;

/// Selects a single element, optionally inside an iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// CSS selector of the iframe whose document is searched.
    pub frame: Option<String>,
    /// CSS selector inside that document.
    pub css: String,
    /// Keep only elements whose trimmed text equals this.
    pub text: Option<String>,
    /// Act on the matched element's parent.
    pub parent: bool,
}

impl Locator {
    pub fn new(css: impl Into<String>) -> Self {
        Self {
            frame: None,
            css: css.into(),
            text: None,
            parent: false,
        }
    }

    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn parent(mut self) -> Self {
        self.parent = true;
        self
    }

    /// Build a self-contained script applying `action` to the first match.
    pub fn script(&self, action: ElementAction<'_>) -> String {
        let root = match &self.frame {
            Some(frame) => format!(
                "(() => {{ const f = document.querySelector('{}'); \
                 try {{ return f ? f.contentDocument : null; }} catch (e) {{ return null; }} }})()",
                js_literal(frame)
            ),
            None => "document".to_string(),
        };
        let filter = match &self.text {
            Some(text) => format!(
                "els = els.filter(el => (el.textContent || '').trim() === '{}');",
                js_literal(text)
            ),
            None => String::new(),
        };
        let pick = if self.parent {
            "let el = els.length ? els[0].parentElement : null;"
        } else {
            "let el = els.length ? els[0] : null;"
        };

        format!(
            r#"(() => {{
    const root = {root};
    if (!root) return {{ found: false }};
    let els = Array.from(root.querySelectorAll('{css}'));
    {filter}
    {pick}
    {body}
}})()"#,
            root = root,
            css = js_literal(&self.css),
            filter = filter,
            pick = pick,
            body = action.body(),
        )
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(frame) = &self.frame {
            write!(f, "{frame} >> ")?;
        }
        write!(f, "{}", self.css)?;
        if let Some(text) = &self.text {
            write!(f, " [text={text:?}]")?;
        }
        if self.parent {
            write!(f, " >> ..")?;
        }
        Ok(())
    }
}

/// What to do with a located element.
#[derive(Debug, Clone, Copy)]
pub enum ElementAction<'a> {
    /// Report presence.
    Probe,
    /// Dispatch a full mouse click sequence.
    Click,
    /// Replace the value of an input and fire `input`/`change`.
    Fill(&'a str),
    /// Dispatch a keydown/keyup pair.
    Press(&'a str),
    /// Read the first match's text.
    Text,
    /// Read the text of every match.
    AllTexts,
}

impl ElementAction<'_> {
    fn body(&self) -> String {
        match self {
            ElementAction::Probe => "return { found: !!el };".to_string(),
            ElementAction::Click => r#"if (!el) return { found: false };
    el.scrollIntoView({ block: 'center' });
    for (const type of ['mousedown', 'mouseup', 'click']) {
        el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: el.ownerDocument.defaultView }));
    }
    return { found: true };"#
                .to_string(),
            ElementAction::Fill(value) => format!(
                r#"if (!el) return {{ found: false }};
    el.focus();
    el.value = '{}';
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return {{ found: true }};"#,
                js_literal(value)
            ),
            ElementAction::Press(key) => format!(
                r#"if (!el) return {{ found: false }};
    el.focus();
    for (const type of ['keydown', 'keyup']) {{
        el.dispatchEvent(new KeyboardEvent(type, {{ key: '{}', bubbles: true }}));
    }}
    return {{ found: true }};"#,
                js_literal(key)
            ),
            ElementAction::Text => {
                "return { found: !!el, text: el ? (el.textContent || '') : null };".to_string()
            }
            ElementAction::AllTexts => {
                "return { found: els.length > 0, texts: els.map(e => (e.textContent || '').trim()) };"
                    .to_string()
            }
        }
    }
}

/// Body of a single-quoted JavaScript literal holding `s`.
///
/// NUL characters are dropped. Angle brackets are hex-escaped so the
/// literal can never close a `<script>` element.
pub fn js_literal(s: &str) -> String {
    s.chars()
        .filter(|&ch| ch != '\0')
        .fold(String::with_capacity(s.len()), |mut out, ch| {
            match js_escape(ch) {
                Some(escaped) => out.push_str(escaped),
                None => out.push(ch),
            }
            out
        })
}

fn js_escape(ch: char) -> Option<&'static str> {
    let escaped = match ch {
        '\\' => r"\\",
        '\'' => r"\'",
        '"' => r#"\""#,
        '`' => r"\`",
        '\n' => r"\n",
        '\r' => r"\r",
        '\t' => r"\t",
        '<' => r"\x3c",
        '>' => r"\x3e",
        _ => return None,
    };
    Some(escaped)
}

/// A live browser page the harvester owns exclusively.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Register the response probe so it runs before any page script on
    /// every subsequent load. Replaces a previously registered probe.
    async fn install_probe(&mut self, script: &str) -> Result<(), DriverError>;

    /// Load a URL and wait for the document to finish loading.
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Evaluate a script in the top document and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, DriverError>;

    /// Wait until the locator matches, failing with
    /// [`DriverError::ElementTimeout`].
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<(), DriverError>;

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError>;

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError>;

    async fn press(&mut self, locator: &Locator, key: &str) -> Result<(), DriverError>;

    /// Text of the first match, or `None` if nothing matches.
    async fn text_content(&mut self, locator: &Locator) -> Result<Option<String>, DriverError>;

    /// Trimmed text of every match.
    async fn all_text_contents(&mut self, locator: &Locator) -> Result<Vec<String>, DriverError>;

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<(), DriverError>;

    /// Take every entry the probe buffered since the last drain.
    async fn drain_probe(&mut self) -> Result<Vec<ProbeEntry>, DriverError> {
        let value = self.evaluate(&probe::drain_script()).await?;
        probe::parse_entries(value)
            .map_err(|e| DriverError::Script(format!("unexpected probe buffer shape: {e}")))
    }

    /// Release the page and its browser.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Creates fresh browser sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}
