//! HTTP execution with retry, rate-limit and response-shape policy.
//!
//! Responsibilities:
//! - Wrap the HTTP client behind a small transport trait so the executor and
//!   its tests can run against deterministic stubs.
//! - Retry network errors and 5xx responses with exponential backoff.
//! - Honor `Retry-After` on 429 up to a 60-second per-call cap; beyond the
//!   cap the call fails without retrying.
//! - Reject HTML masquerading as JSON and 2xx statuses outside
//!   {200, 201, 204}, and surface JSON bodies carrying an `error` field.

use crate::error::{MenderError, MenderResult};
use crate::types::HttpMethod;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling a `Retry-After` may ask for before the call fails
/// non-retryably.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

/// A fully-interpolated request, ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query_params: Vec<(String, String)>,
    /// Raw body text; a JSON-looking body gets a JSON content type.
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query_params: Vec::new(),
            body: None,
        }
    }

    /// One-line description used in error surfaces.
    pub fn summary(&self) -> String {
        format!("{} {}", self.method.as_str(), self.url)
    }
}

/// Options governing retry behavior and the per-call deadline.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Raw response as seen by the policy layer. Header names are lowercased;
/// the body stays bytes so file downloads survive untouched.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Transport abstraction: one request in, one response out, no policy.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> MenderResult<HttpResponse>;
}

/// Production transport over a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> MenderResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MenderError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> MenderResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(timeout)
            .query(&request.query_params);

        let mut has_content_type = false;
        for (key, value) in &request.headers {
            if key.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            builder = builder.header(key, value);
        }

        if let Some(body) = &request.body {
            let trimmed = body.trim();
            let looks_json = trimmed.starts_with('{') || trimmed.starts_with('[');
            if looks_json && !has_content_type {
                builder = builder.header("Content-Type", "application/json");
            }
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| MenderError::Http {
            status: 0,
            body: format!("request failed: {}", e),
            request_summary: request.summary(),
        })?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            headers.insert(
                key.as_str().to_ascii_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            );
        }
        let body = response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .unwrap_or_default();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Decoded payload of a successful call.
enum Payload {
    Json(Value),
    Raw(Vec<u8>),
}

/// What the policy layer decided to do with one response.
enum Disposition {
    Done(Payload),
    Retry(MenderError),
    RetryAfter(Duration, MenderError),
    Fail(MenderError),
}

/// HTTP caller applying the retry/rate-limit policy over a transport.
pub struct HttpCaller {
    transport: Arc<dyn HttpTransport>,
}

impl HttpCaller {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Execute `request`, retrying per `options`. Returns the decoded JSON
    /// body (null for empty bodies).
    pub async fn call(&self, request: &HttpRequest, options: &CallOptions) -> MenderResult<Value> {
        match self.call_inner(request, options, false).await? {
            Payload::Json(value) => Ok(value),
            Payload::Raw(_) => unreachable!("json mode always yields a json payload"),
        }
    }

    /// Execute `request` for a raw download: same retry and status policy,
    /// no JSON or HTML interpretation of the body.
    pub async fn fetch_raw(
        &self,
        request: &HttpRequest,
        options: &CallOptions,
    ) -> MenderResult<Vec<u8>> {
        match self.call_inner(request, options, true).await? {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Json(_) => unreachable!("raw mode always yields a raw payload"),
        }
    }

    async fn call_inner(
        &self,
        request: &HttpRequest,
        options: &CallOptions,
        raw: bool,
    ) -> MenderResult<Payload> {
        let mut attempt: u32 = 0;
        let mut delay = options.retry_delay;

        loop {
            let outcome = match self.transport.execute(request, options.timeout).await {
                Ok(response) => classify(response, request, raw),
                Err(e) => Disposition::Retry(e),
            };

            match outcome {
                Disposition::Done(payload) => return Ok(payload),
                Disposition::Fail(error) => return Err(error),
                Disposition::Retry(error) => {
                    if attempt >= options.retries {
                        return Err(error);
                    }
                    log::warn!(
                        "retrying {} after failure (attempt {}/{}): {}",
                        request.summary(),
                        attempt + 1,
                        options.retries,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Disposition::RetryAfter(wait, error) => {
                    if attempt >= options.retries {
                        return Err(error);
                    }
                    log::warn!(
                        "rate limited on {}, honoring Retry-After of {:?}",
                        request.summary(),
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Apply the response-shape policy to one raw response.
fn classify(response: HttpResponse, request: &HttpRequest, raw: bool) -> Disposition {
    let status = response.status;
    let body_text = String::from_utf8_lossy(&response.body).into_owned();

    if status == 429 {
        let error = MenderError::Http {
            status,
            body: truncate(&body_text, 2_000),
            request_summary: request.summary(),
        };
        return match retry_after(&response.headers) {
            Some(wait) if wait > RETRY_AFTER_CAP => Disposition::Fail(MenderError::Http {
                status,
                body: format!(
                    "rate limited; Retry-After of {}s exceeds the {}s cap",
                    wait.as_secs(),
                    RETRY_AFTER_CAP.as_secs()
                ),
                request_summary: request.summary(),
            }),
            Some(wait) => Disposition::RetryAfter(wait, error),
            None => Disposition::Retry(error),
        };
    }

    if status >= 500 {
        return Disposition::Retry(MenderError::Http {
            status,
            body: truncate(&body_text, 2_000),
            request_summary: request.summary(),
        });
    }

    if !matches!(status, 200 | 201 | 204) {
        return Disposition::Fail(MenderError::Http {
            status,
            body: truncate(&body_text, 2_000),
            request_summary: request.summary(),
        });
    }

    if raw {
        return Disposition::Done(Payload::Raw(response.body));
    }

    let trimmed = body_text.trim_start();
    let lowered = trimmed
        .get(..trimmed.len().min(32))
        .unwrap_or("")
        .to_ascii_lowercase();
    if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
        return Disposition::Fail(MenderError::HtmlInsteadOfJson {
            url: request.url.clone(),
        });
    }

    if trimmed.is_empty() {
        return Disposition::Done(Payload::Json(Value::Null));
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            return Disposition::Fail(MenderError::Http {
                status,
                body: format!("response is not valid JSON ({}): {}", e, truncate(trimmed, 500)),
                request_summary: request.summary(),
            })
        }
    };

    // A 2xx body carrying an error field is still a failure; the synthesizer
    // decides whether to regenerate the config.
    if let Some(error_field) = value.get("error") {
        if !error_field.is_null() {
            return Disposition::Fail(MenderError::Http {
                status,
                body: format!("response body carries an error field: {}", error_field),
                request_summary: request.summary(),
            });
        }
    }

    Disposition::Done(Payload::Json(value))
}

/// Parse `Retry-After` as either delta-seconds or an HTTP date.
fn retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    let raw = headers.get("retry-after")?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.signed_duration_since(chrono::Utc::now());
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &text[..cut], text.len())
    }
}
