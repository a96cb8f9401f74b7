//! Web search tool backed by the DuckDuckGo HTML endpoint (no API key needed).

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use super::Tool;

pub(crate) const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Sentinel returned when a query yields nothing.
pub const NO_RESULTS: &str = "No results found.";

/// One search hit as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Search the web for current information.
pub struct WebSearch {
    endpoint: String,
    max_results: usize,
}

impl WebSearch {
    pub fn new(endpoint: impl Into<String>, max_results: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web for the given query using DuckDuckGo to find current information, news, facts, or general knowledge. Returns a JSON string with a list of search results, each containing 'title', 'href', and 'body'. Use this when you need up-to-date information or to answer questions about topics not in your inherent knowledge. Choose concise and effective search queries."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = args["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;

        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));

        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; Cognito/0.1)")
            .timeout(Duration::from_secs(20))
            .build()?;

        tracing::info!(query = query, "Running web search");

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP error: {}", status));
        }
        let html = response.text().await?;

        render_results(&extract_ddg_results(&html, self.max_results))
    }
}

/// Serialize results for the model, or the no-results sentinel.
fn render_results(results: &[SearchResult]) -> anyhow::Result<String> {
    if results.is_empty() {
        Ok(NO_RESULTS.to_string())
    } else {
        Ok(serde_json::to_string(results)?)
    }
}

/// Extract search results from DuckDuckGo HTML.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    for chunk in html.split("result__body").skip(1) {
        if results.len() >= limit {
            break;
        }

        let Some(anchor) = chunk.split("class=\"result__a\"").nth(1) else {
            continue;
        };

        // Attributes up to the end of the opening tag, then the inner HTML.
        let (attrs, rest) = anchor.split_once('>').unwrap_or((anchor, ""));
        let title = rest.split("</a>").next().map(strip_tags).unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let href = attrs
            .split("href=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .map(resolve_link)
            .unwrap_or_default();

        let body = chunk
            .split("class=\"result__snippet\"")
            .nth(1)
            .and_then(|s| s.split_once('>'))
            .map(|(_, inner)| {
                let end = inner
                    .find("</a>")
                    .or_else(|| inner.find("</div>"))
                    .unwrap_or(inner.len());
                strip_tags(&inner[..end])
            })
            .unwrap_or_default();

        results.push(SearchResult { title, href, body });
    }

    results
}

/// Unwrap DuckDuckGo redirect links (`//duckduckgo.com/l/?uddg=<target>`).
fn resolve_link(raw: &str) -> String {
    let decoded = html_decode(raw);
    if let Some(target) = decoded
        .split_once("uddg=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or(rest))
    {
        if let Ok(url) = urlencoding::decode(target) {
            return url.into_owned();
        }
    }
    if let Some(rest) = decoded.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    decoded
}

fn strip_tags(fragment: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
    let text = tag.replace_all(fragment, "");
    html_decode(&text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
<div class="result results_links results_links_deep web-result ">
  <div class="links_main links_deep result__body">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fen.wikipedia.org%2Fwiki%2FParis&amp;rut=abc">Paris - <b>Wikipedia</b></a>
    </h2>
    <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Paris is the <b>capital</b> of France &amp; its largest city.</a>
  </div>
</div>
<div class="result results_links results_links_deep web-result ">
  <div class="links_main links_deep result__body">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="https://example.com/france">France facts</a>
    </h2>
    <a class="result__snippet" href="https://example.com/france">Facts about France.</a>
  </div>
</div>
<div class="result results_links results_links_deep web-result ">
  <div class="links_main links_deep result__body">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="https://example.com/3">Third</a>
    </h2>
  </div>
</div>
<div class="result results_links results_links_deep web-result ">
  <div class="links_main links_deep result__body">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="https://example.com/4">Fourth</a>
    </h2>
  </div>
</div>
"#;

    #[test]
    fn extracts_title_link_and_snippet() {
        let results = extract_ddg_results(FIXTURE, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0],
            SearchResult {
                title: "Paris - Wikipedia".to_string(),
                href: "https://en.wikipedia.org/wiki/Paris".to_string(),
                body: "Paris is the capital of France & its largest city.".to_string(),
            }
        );
        assert_eq!(results[1].href, "https://example.com/france");
        assert_eq!(results[2].title, "Third");
        assert_eq!(results[2].body, "");
    }

    #[test]
    fn respects_result_limit() {
        assert_eq!(extract_ddg_results(FIXTURE, 1).len(), 1);
        assert_eq!(extract_ddg_results(FIXTURE, 10).len(), 4);
    }

    #[test]
    fn empty_page_yields_sentinel() {
        let results = extract_ddg_results("<html><body>No results.</body></html>", 3);
        assert!(results.is_empty());
        assert_eq!(render_results(&results).unwrap(), NO_RESULTS);
    }

    #[test]
    fn results_serialize_as_json_list() {
        let results = extract_ddg_results(FIXTURE, 2);
        let rendered = render_results(&results).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["title"], "France facts");
        assert_eq!(parsed[1]["body"], "Facts about France.");
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let tool = WebSearch::new(DEFAULT_ENDPOINT, 3);
        let err = tool.execute(json!({"query": "  "})).await.unwrap_err();
        assert!(err.to_string().contains("Missing 'query'"));
    }
}
