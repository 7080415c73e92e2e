//! Web and Wikipedia search tool.
//!
//! Web search scrapes the DuckDuckGo HTML endpoint (no API key), parsing
//! results with CSS selectors. Wikipedia uses the MediaWiki search API.
//! Results lead with an instruction entry telling the model it can open
//! links for more detail.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;

use super::{Tool, require_str, status};
use crate::error::{AssistantError, Result};
use crate::session::Session;

/// DuckDuckGo HTML search endpoint.
const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

/// MediaWiki API endpoint for English Wikipedia.
const WIKIPEDIA_API: &str = "https://en.wikipedia.org/w/api.php";

/// Default number of results.
const DEFAULT_RESULTS: usize = 10;

/// One parsed web search result.
#[derive(Debug, Clone)]
struct WebResult {
    title: String,
    snippet: String,
    link: String,
}

/// Searches the web or Wikipedia.
pub struct PerformSearch {
    client: reqwest::Client,
    web_url: String,
    wikipedia_url: String,
}

impl Default for PerformSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformSearch {
    /// Create the tool against the public endpoints.
    pub fn new() -> Self {
        Self::with_endpoints(DUCKDUCKGO_HTML, WIKIPEDIA_API)
    }

    /// Create the tool against custom endpoints (tests).
    pub fn with_endpoints(
        web_url: impl Into<String>,
        wikipedia_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            web_url: web_url.into(),
            wikipedia_url: wikipedia_url.into(),
        }
    }

    async fn search_web(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(&self.web_url)
            .query(&[("q", query)])
            .header("accept", "text/html")
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("web search request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Tool(format!("web search HTTP error: {e}")))?;

        let html = response
            .text()
            .await
            .map_err(|e| AssistantError::Tool(format!("web search read failed: {e}")))?;

        let results = parse_duckduckgo_html(&html, limit);
        if results.is_empty() {
            return Ok(vec![serde_json::json!({
                "error": "no results found, probably web search tool failure"
            })]);
        }

        let mut entries = vec![serde_json::json!({
            "instruction": "If more information is required, open the websites of interest from the following results."
        })];
        entries.extend(results.into_iter().map(|r| {
            serde_json::json!({"title": r.title, "snippet": r.snippet, "link": r.link})
        }));
        Ok(entries)
    }

    async fn search_wikipedia(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(&self.wikipedia_url)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", &limit.to_string()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("wikipedia request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Tool(format!("wikipedia HTTP error: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Tool(format!("wikipedia bad response: {e}")))?;

        let hits = body
            .pointer("/query/search")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if hits.is_empty() {
            return Ok(vec![serde_json::json!({
                "error": "No results, try another search term"
            })]);
        }

        Ok(hits
            .iter()
            .filter_map(|hit| {
                let title = hit.get("title")?.as_str()?;
                let summary = hit
                    .get("snippet")
                    .and_then(Value::as_str)
                    .map(strip_markup)
                    .unwrap_or_default();
                let url = format!(
                    "https://en.wikipedia.org/wiki/{}",
                    urlencoding::encode(&title.replace(' ', "_"))
                );
                Some(serde_json::json!({"title": title, "summary": summary, "url": url}))
            })
            .collect())
    }
}

#[async_trait]
impl Tool for PerformSearch {
    fn name(&self) -> &str {
        "perform_search"
    }

    fn description(&self) -> &str {
        "Perform a search on the web or Wikipedia"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to search with."
                },
                "source": {
                    "type": "string",
                    "description": "The source to search (options: \"web\", \"wikipedia\")."
                },
                "number": {
                    "type": "integer",
                    "description": "Number of results to return. Default is 10."
                }
            },
            "required": ["query", "source"]
        })
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        let query = require_str(params, "query")?;
        let source = require_str(params, "source")?;
        let limit = params
            .get("number")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_RESULTS, |n| n.clamp(1, 25) as usize);

        let results = match source {
            "web" => {
                status(session, format!("Performing web search: '{query}'.")).await;
                self.search_web(query, limit).await?
            }
            "wikipedia" => {
                status(session, format!("Researching '{query}' on Wikipedia.")).await;
                self.search_wikipedia(query, limit).await?
            }
            _ => {
                return Ok(serde_json::json!({
                    "error": "Invalid source specified. Choose \"web\" or \"wikipedia\"."
                }));
            }
        };

        Ok(serde_json::json!({"results": results}))
    }
}

/// Parse the DuckDuckGo HTML results page.
fn parse_duckduckgo_html(html: &str, limit: usize) -> Vec<WebResult> {
    let document = Html::parse_document(html);
    let Ok(result_sel) = Selector::parse(".result") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse(".result__a") else {
        return Vec::new();
    };
    let Ok(snippet_sel) = Selector::parse(".result__snippet") else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for element in document.select(&result_sel) {
        let Some(anchor) = element.select(&title_sel).next() else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_owned();
        let Some(link) = anchor.value().attr("href") else {
            continue;
        };
        if title.is_empty() || link.is_empty() {
            continue;
        }
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_owned())
            .unwrap_or_default();

        results.push(WebResult {
            title,
            snippet,
            link: link.to_owned(),
        });
        if results.len() >= limit {
            break;
        }
    }
    results
}

/// Strip the `<span class="searchmatch">` markup MediaWiki embeds in snippets.
fn strip_markup(snippet: &str) -> String {
    Html::parse_fragment(snippet)
        .root_element()
        .text()
        .collect::<String>()
}
