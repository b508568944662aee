//! Documentation fetcher for the endpoint synthesizer.
//!
//! Retrieves API documentation text best-effort: a fetch failure yields an
//! empty string rather than an error, because synthesis can often succeed
//! from the instruction and URL alone. HTML is reduced to visible text
//! before it reaches a prompt.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct DocumentationFetcher {
    client: reqwest::Client,
}

impl DocumentationFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Fetch a documentation page as text. Returns an empty string on any
    /// failure.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        query: &HashMap<String, String>,
    ) -> String {
        let mut builder = self.client.get(url);
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        if !query.is_empty() {
            builder = builder.query(&query.iter().collect::<Vec<_>>());
        }
        match builder.send().await {
            Ok(response) => match response.text().await {
                Ok(body) => normalize(&body),
                Err(e) => {
                    log::debug!("documentation body unreadable from {}: {}", url, e);
                    String::new()
                }
            },
            Err(e) => {
                log::debug!("documentation fetch failed for {}: {}", url, e);
                String::new()
            }
        }
    }

    /// Fetch documentation for a config: prefer the explicit documentation
    /// URL, fall back to the API base URL.
    pub async fn fetch_for(&self, documentation_url: Option<&str>, url_host: &str) -> String {
        let url = documentation_url.unwrap_or(url_host);
        if url.is_empty() {
            return String::new();
        }
        self.fetch(url, &HashMap::new(), &HashMap::new()).await
    }
}

impl Default for DocumentationFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Reduce an HTML (or plain-text) document to readable text: scripts,
/// styles and tags dropped, entities decoded, whitespace collapsed.
pub fn normalize(body: &str) -> String {
    let looks_html = body.contains('<') && body.contains('>');
    if !looks_html {
        return body.trim().to_string();
    }
    let without_scripts = script_re().replace_all(body, " ");
    let without_tags = tag_re().replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    ws_re().replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_strips_tags_and_scripts() {
        let html = r#"<html><head><style>p { color: red }</style>
            <script>var x = "<b>";</script></head>
            <body><h1>Users API</h1><p>GET /users &amp; friends</p></body></html>"#;
        assert_eq!(normalize(html), "Users API GET /users & friends");
    }

    #[test]
    fn test_normalize_passes_plain_text_through() {
        assert_eq!(normalize("  plain docs  "), "plain docs");
    }
}
