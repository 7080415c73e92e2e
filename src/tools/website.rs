//! Web page fetch tool.
//!
//! Fetches a URL with a browser user agent and returns readable text:
//! boilerplate elements are stripped before parsing, whitespace is
//! collapsed, and the result is truncated so one page cannot drown the
//! prompt.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{Tool, require_str, status};
use crate::error::{AssistantError, Result};
use crate::session::Session;

/// Browser user agent; some sites reject obvious bots.
const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Fetch attempts before giving up.
const MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Maximum characters of extracted page text returned to the model.
const MAX_PAGE_CHARS: usize = 8000;

/// Opens a web page and returns its readable text.
pub struct OpenWebsite {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl Default for OpenWebsite {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenWebsite {
    /// Create the tool with the standard retry delay.
    pub fn new() -> Self {
        Self::with_retry_delay(RETRY_DELAY)
    }

    /// Create the tool with a custom retry delay (shortened in tests).
    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_delay,
        }
    }
}

#[async_trait]
impl Tool for OpenWebsite {
    fn name(&self) -> &str {
        "open_website"
    }

    fn description(&self) -> &str {
        "Open a website to see its contents to answer user requests"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The full URL of the web page to view contents of."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        let url = require_str(params, "url")?;
        let url = url::Url::parse(url)
            .map_err(|e| AssistantError::Tool(format!("invalid URL '{url}': {e}")))?;
        status(session, "Opening website.").await;

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch(url.as_str()).await {
                Ok(html) => {
                    let text = extract_page_text(&html, MAX_PAGE_CHARS);
                    return Ok(serde_json::json!({"text": text}));
                }
                Err(e) => {
                    debug!(url = %url, attempt, "website fetch failed: {e}");
                    last_error = e.to_string();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Ok(serde_json::json!({
            "text": format!("Failed to open web link after {MAX_ATTEMPTS} attempts: {last_error}")
        }))
    }
}

impl OpenWebsite {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("user-agent", BROWSER_UA)
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Tool(format!("HTTP error: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| AssistantError::Tool(format!("body read failed: {e}")))
    }
}

/// Extract readable text from static HTML.
pub fn extract_page_text(html: &str, max_chars: usize) -> String {
    let cleaned = strip_noise_tags(html);
    let document = Html::parse_document(&cleaned);

    let mut text = String::new();
    for selector_str in ["article", "main", "body"] {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            text = element.text().collect::<Vec<_>>().join(" ");
            if !text.trim().is_empty() {
                break;
            }
        }
    }

    let collapsed = collapse_whitespace(&text);
    truncate_chars(&collapsed, max_chars)
}

/// Remove elements whose content is never readable text.
fn strip_noise_tags(html: &str) -> String {
    let mut result = html.to_owned();
    for tag in ["script", "style", "noscript", "svg", "iframe"] {
        result = strip_tag(&result, tag);
    }
    result
}

/// Remove all instances of one tag and its content (case-insensitive).
fn strip_tag(html: &str, tag: &str) -> String {
    let lower = html.to_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut result = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(offset) = lower[pos..].find(&open) {
        let start = pos + offset;
        // Guard against prefix matches like <svgfoo> for <svg>.
        let after = start + open.len();
        if !matches!(
            lower.as_bytes().get(after).copied(),
            None | Some(b' ' | b'>' | b'/' | b'\n' | b'\r' | b'\t')
        ) {
            result.push_str(&html[pos..after]);
            pos = after;
            continue;
        }

        result.push_str(&html[pos..start]);
        pos = match lower[start..].find(&close) {
            Some(end) => start + end + close.len(),
            None => match lower[start..].find('>') {
                Some(end) => start + end + 1,
                None => html.len(),
            },
        };
    }
    result.push_str(&html[pos..]);
    result
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
