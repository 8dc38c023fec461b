//! In-page response probe contract.
//!
//! The probe wraps the page's `XMLHttpRequest.open` and `fetch`, tags every
//! call whose URL matches [`URL_PATTERNS`] and pushes
//! `{classification, rawResponseText, url}` onto a FIFO on `window.top`.
//! The script is generated from the same pattern table the collector
//! classifies with.

use serde::{Deserialize, Serialize};

use crate::types::URL_PATTERNS;

/// Name of the page-global buffer on `window.top`.
pub const BUFFER_KEY: &str = "__sidmResponses";

/// One buffered response as the probe stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeEntry {
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub raw_response_text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Build the script to register before any page load.
pub fn probe_script() -> String {
    let patterns = URL_PATTERNS
        .iter()
        .map(|(pattern, class)| format!("[{:?}, {:?}]", pattern, class.tag()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"(() => {{
    const KEY = "{key}";
    const PATTERNS = [{patterns}];
    let host;
    try {{ host = window.top; }} catch (e) {{ host = window; }}
    if (!Array.isArray(host[KEY])) host[KEY] = [];
    if (window.__sidmProbeInstalled) return;
    window.__sidmProbeInstalled = true;

    const classify = (url) => {{
        for (const [pattern, tag] of PATTERNS) {{
            if (url.includes(pattern)) return tag;
        }}
        return null;
    }};
    const push = (entry) => {{
        if (!Array.isArray(host[KEY])) host[KEY] = [];
        host[KEY].push(entry);
    }};

    const open = window.XMLHttpRequest.prototype.open;
    window.XMLHttpRequest.prototype.open = function (method, url) {{
        const target = String(url);
        const classification = classify(target);
        if (classification) {{
            this.addEventListener("readystatechange", function () {{
                if (this.readyState !== 4) return;
                try {{
                    push({{ classification, rawResponseText: this.responseText, url: target }});
                }} catch (e) {{
                    console.warn("sidm probe: dropped response", target, e);
                }}
            }}, false);
        }}
        return open.apply(this, arguments);
    }};

    const originalFetch = window.fetch;
    if (typeof originalFetch === "function") {{
        window.fetch = async function (...args) {{
            const input = args[0];
            const target = input instanceof Request ? input.url : String(input);
            const response = await originalFetch.apply(this, args);
            const classification = classify(target);
            if (classification) {{
                response.clone().text().then(
                    (text) => push({{ classification, rawResponseText: text, url: target }}),
                    (e) => console.warn("sidm probe: dropped response", target, e)
                );
            }}
            return response;
        }};
    }}
}})();"#,
        key = BUFFER_KEY,
        patterns = patterns,
    )
}

/// Script that takes every buffered entry and leaves the buffer empty.
pub fn drain_script() -> String {
    format!(
        r#"(() => {{
    const buffer = window.top["{key}"];
    if (!Array.isArray(buffer)) return [];
    return buffer.splice(0, buffer.length);
}})()"#,
        key = BUFFER_KEY
    )
}

/// Parse the drain script's result.
pub fn parse_entries(value: serde_json::Value) -> Result<Vec<ProbeEntry>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value)
}
