//! `WebSearch`: instant-answer web search with domain filtering.
//!
//! Results whose host matches a blocked domain (or any subdomain of one) are
//! dropped before they reach the model. Verdicts are memoized per host in a
//! `TtlCache` owned by the tool.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::cache::TtlCache;
use super::{optional_u64, require_str, Tool, ToolError};
use crate::config::{domain_cache_ttl, ToolsConfig};
use crate::agent_core::types::ToolResult;

/// Per-request HTTP timeout.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Results returned when `max_results` is not given.
const DEFAULT_MAX_RESULTS: usize = 8;

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub url: String,
}

/// Whether hosts are safe to surface, cached with a TTL.
pub struct DomainSafety {
    blocked: Vec<String>,
    verdicts: TtlCache<String, bool>,
}

impl DomainSafety {
    pub fn new(blocked: Vec<String>, ttl: chrono::Duration) -> Self {
        let blocked = blocked
            .into_iter()
            .map(|d| d.trim().trim_start_matches('.').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            blocked,
            verdicts: TtlCache::new(ttl),
        }
    }

    /// `true` unless the URL's host is (a subdomain of) a blocked domain.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        if let Some(verdict) = self.verdicts.get(&host) {
            return verdict;
        }
        let allowed = !self
            .blocked
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        self.verdicts.insert(host, allowed);
        allowed
    }

    pub fn cached_verdicts(&self) -> usize {
        self.verdicts.len()
    }
}

/// Extract the lowercase host from an http(s) URL.
fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Flatten an instant-answer response into hits.
fn parse_hits(body: &Value) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let abstract_text = body["AbstractText"].as_str().unwrap_or_default();
    let abstract_url = body["AbstractURL"].as_str().unwrap_or_default();
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        hits.push(SearchHit {
            text: abstract_text.to_string(),
            url: abstract_url.to_string(),
        });
    }

    fn walk(topics: &[Value], hits: &mut Vec<SearchHit>) {
        for topic in topics {
            if let Some(nested) = topic["Topics"].as_array() {
                walk(nested, hits);
                continue;
            }
            if let (Some(text), Some(url)) = (topic["Text"].as_str(), topic["FirstURL"].as_str()) {
                hits.push(SearchHit {
                    text: text.to_string(),
                    url: url.to_string(),
                });
            }
        }
    }
    if let Some(topics) = body["RelatedTopics"].as_array() {
        walk(topics, &mut hits);
    }
    hits
}

/// Queries an instant-answer endpoint and filters blocked domains.
pub struct WebSearchTool {
    http: HttpClient,
    endpoint: String,
    safety: DomainSafety,
}

impl WebSearchTool {
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        let http = HttpClient::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Network {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let ttl = domain_cache_ttl(config.domain_cache_ttl_secs).ok_or_else(|| {
            ToolError::InvalidParameter {
                param: "domain_cache_ttl_secs".into(),
                reason: format!("{} is out of range", config.domain_cache_ttl_secs),
            }
        })?;
        Ok(Self {
            http,
            endpoint: config.search_endpoint.clone(),
            safety: DomainSafety::new(config.blocked_domains.clone(), ttl),
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "WebSearch"
    }

    fn description(&self) -> &str {
        "Search the web and return short summaries with source URLs"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let query = require_str(params, "query")?;
        let max_results = optional_u64(params, "max_results")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Network {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::failure(
                format!("search endpoint returned HTTP {}", status.as_u16()),
                None,
            ));
        }

        let body: Value = response.json().await.map_err(|e| ToolError::Network {
            reason: format!("invalid search response: {e}"),
        })?;

        let all = parse_hits(&body);
        let total = all.len();
        let hits: Vec<SearchHit> = all
            .into_iter()
            .filter(|h| self.safety.is_allowed(&h.url))
            .take(max_results)
            .collect();

        tracing::debug!(
            query,
            total,
            returned = hits.len(),
            cached_verdicts = self.safety.cached_verdicts(),
            "web search complete"
        );

        Ok(ToolResult::ok(json!({
            "query": query,
            "results": hits,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://Example.com/path?q=1").as_deref(), Some("example.com"));
        assert_eq!(host_of("http://user@host.io:8080/x").as_deref(), Some("host.io"));
        assert_eq!(host_of("HTTPS://Upper.Example.ORG/").as_deref(), Some("upper.example.org"));
        assert_eq!(host_of("https://trailing.com./x").as_deref(), Some("trailing.com"));
        assert_eq!(host_of("ftp://nope"), None);
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_backslash_and_userinfo_cannot_hide_blocked_host() {
        let safety = DomainSafety::new(vec!["evil.com".into()], chrono::Duration::seconds(60));
        assert!(!safety.is_allowed("https://evil.com\\@good.com/"));
        assert!(!safety.is_allowed("https://good.com@evil.com/"));
        assert!(!safety.is_allowed("https://user:pw@EVIL.com:443/x"));
        assert!(!safety.is_allowed("HTTPS://Evil.Com./"));
        assert!(safety.is_allowed("https://evil.com.good.org/"));
    }

    #[test]
    fn test_domain_safety_blocks_subdomains() {
        let safety = DomainSafety::new(vec!["bad.com".into()], chrono::Duration::seconds(60));
        assert!(!safety.is_allowed("https://bad.com/a"));
        assert!(!safety.is_allowed("https://cdn.bad.com/a"));
        assert!(safety.is_allowed("https://notbad.com/a"));
        assert!(!safety.is_allowed("not a url"));
        assert_eq!(safety.cached_verdicts(), 3);
    }

    #[test]
    fn test_verdicts_are_cached() {
        let safety = DomainSafety::new(vec![], chrono::Duration::seconds(60));
        assert!(safety.is_allowed("https://a.org/1"));
        assert!(safety.is_allowed("https://a.org/2"));
        assert_eq!(safety.cached_verdicts(), 1);
    }

    #[test]
    fn test_parse_hits_flattens_topics() {
        let body = json!({
            "AbstractText": "Rust is a language",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "RelatedTopics": [
                {"Text": "Cargo", "FirstURL": "https://doc.rust-lang.org/cargo"},
                {"Name": "Group", "Topics": [
                    {"Text": "Tokio", "FirstURL": "https://tokio.rs"}
                ]},
                {"Text": "no url"}
            ]
        });
        let hits = parse_hits(&body);
        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://en.wikipedia.org/wiki/Rust",
                "https://doc.rust-lang.org/cargo",
                "https://tokio.rs"
            ]
        );
    }

    #[test]
    fn test_parse_hits_empty_body() {
        assert!(parse_hits(&json!({})).is_empty());
    }

    // ─── execute against a local endpoint ───

    /// Serve one canned response and return the endpoint URL.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            while !String::from_utf8_lossy(&seen).contains("\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/")
    }

    fn tool_for(endpoint: String, blocked: &[&str]) -> WebSearchTool {
        let config = ToolsConfig {
            search_endpoint: endpoint,
            blocked_domains: blocked.iter().map(|d| d.to_string()).collect(),
            ..ToolsConfig::default()
        };
        WebSearchTool::from_config(&config).unwrap()
    }

    fn query(q: &str, max_results: Option<u64>) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("query".into(), json!(q));
        if let Some(n) = max_results {
            params.insert("max_results".into(), json!(n));
        }
        params
    }

    fn topics_body(urls: &[&str]) -> String {
        let topics: Vec<Value> = urls
            .iter()
            .map(|u| json!({"Text": format!("about {u}"), "FirstURL": u}))
            .collect();
        json!({"RelatedTopics": topics}).to_string()
    }

    #[tokio::test]
    async fn test_execute_filters_blocked_results() {
        let body = topics_body(&["https://ok.org/a", "https://ads.spam.net/b", "https://ok.org/c"]);
        let tool = tool_for(serve_once("HTTP/1.1 200 OK", body).await, &["spam.net"]);

        let result = tool.execute(&query("rust", None)).await.unwrap();
        assert!(result.success());
        let data = result.data().unwrap();
        assert_eq!(data["query"], "rust");
        let urls: Vec<&str> = data["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["url"].as_str().unwrap())
            .collect();
        assert_eq!(urls, vec!["https://ok.org/a", "https://ok.org/c"]);
    }

    #[tokio::test]
    async fn test_execute_caps_max_results() {
        let body = topics_body(&["https://a.org", "https://b.org", "https://c.org", "https://d.org"]);
        let tool = tool_for(serve_once("HTTP/1.1 200 OK", body).await, &[]);

        let result = tool.execute(&query("letters", Some(2))).await.unwrap();
        assert_eq!(result.data().unwrap()["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_non_2xx_is_failure_envelope() {
        let tool = tool_for(
            serve_once("HTTP/1.1 429 Too Many Requests", "{}".to_string()).await,
            &[],
        );

        let result = tool.execute(&query("anything", None)).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.error(), Some("search endpoint returned HTTP 429"));
        assert!(result.data().is_none());
    }

    #[tokio::test]
    async fn test_execute_missing_query_is_error() {
        let tool = tool_for("http://127.0.0.1:1/".to_string(), &[]);
        let err = tool.execute(&Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter { .. }));
    }
}
