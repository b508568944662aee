//! Request executor: variable binding, paginated invocation, payload
//! extraction and shape heuristics.
//!
//! Responsibilities:
//! - Refuse to send anything while placeholders are unbound (fatal, no HTTP).
//! - Drive the pagination loop: bind `{page, offset, limit}` per strategy,
//!   fetch sequentially, and stop on a non-array page, a short page, a page
//!   identical to everything accumulated so far, or the iteration ceiling.
//! - Navigate `dataPath` forgivingly and surface `data_path_success` so the
//!   synthesizer loop can see extraction misses.

use crate::error::{MenderError, MenderResult};
use crate::http::{CallOptions, HttpCaller, HttpRequest};
use crate::interpolate;
use crate::types::{ApiConfig, PaginationType};
use serde_json::Value;
use std::collections::HashMap;

/// Hard ceiling on pagination iterations.
const MAX_PAGINATION_ITERATIONS: usize = 500;

/// Result of executing a config: the combined payload plus whether every
/// `dataPath` navigation fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOutcome {
    pub data: Value,
    pub data_path_success: bool,
}

pub struct RequestExecutor {
    caller: HttpCaller,
}

/// Merge payload, credentials and pagination bindings into one variable map.
/// Credentials shadow payload keys; pagination vars shadow both.
fn variable_map(payload: &Value, credentials: &Value) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    for source in [payload, credentials] {
        if let Value::Object(map) = source {
            for (key, value) in map {
                vars.insert(key.clone(), value.clone());
            }
        }
    }
    vars
}

/// Compose the request URL from host and path templates.
fn compose_url(host: &str, path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!(
            "{}/{}",
            host.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        _ => host.trim_end_matches('/').to_string(),
    }
}

/// Forgiving dot-path navigation. A leading `$` segment means "root". A
/// missing segment keeps the last valid value and reports the miss instead
/// of failing; whether that is the right payload is for the synthesizer
/// feedback loop to judge.
pub(crate) fn navigate_data_path(value: &Value, data_path: &str) -> (Value, bool) {
    let mut current = value.clone();
    let mut success = true;
    for segment in data_path.split('.') {
        if segment.is_empty() || segment == "$" {
            continue;
        }
        let next = match &current {
            Value::Object(map) => map.get(segment).cloned(),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => {
                log::warn!(
                    "dataPath segment '{}' not found; keeping last valid value",
                    segment
                );
                success = false;
                break;
            }
        }
    }
    (current, success)
}

impl RequestExecutor {
    pub fn new(caller: HttpCaller) -> Self {
        Self { caller }
    }

    /// Execute `config` with the given bindings. See module docs for the
    /// loop's termination rules.
    pub async fn call(
        &self,
        config: &ApiConfig,
        payload: &Value,
        credentials: &Value,
        options: &CallOptions,
    ) -> MenderResult<ExecutorOutcome> {
        let base_vars = variable_map(payload, credentials);
        let known: Vec<String> = base_vars.keys().cloned().collect();

        // Fatal before any HTTP: every referenced placeholder must be bound.
        let unbound = interpolate::validate_config(config, &known);
        if !unbound.is_empty() {
            return Err(MenderError::UnresolvedVariables(unbound));
        }

        let (pagination_type, page_size) = match &config.pagination {
            Some(p) if p.pagination_type != PaginationType::Disabled => {
                (Some(p.pagination_type), p.page_size as usize)
            }
            Some(p) => (None, p.page_size as usize),
            None => (None, 50),
        };

        let mut all_results: Vec<Value> = Vec::new();
        let mut data_path_success = true;
        let mut scalar_result: Option<Value> = None;

        for iteration in 0..MAX_PAGINATION_ITERATIONS {
            let mut vars = base_vars.clone();
            vars.insert("limit".to_string(), Value::from(page_size));
            match pagination_type {
                Some(PaginationType::PageBased) => {
                    vars.insert("page".to_string(), Value::from(iteration + 1));
                    vars.insert("offset".to_string(), Value::from(iteration * page_size));
                }
                Some(PaginationType::OffsetBased) => {
                    vars.insert("offset".to_string(), Value::from(iteration * page_size));
                    vars.insert("page".to_string(), Value::from(iteration + 1));
                }
                _ => {
                    vars.insert("page".to_string(), Value::from(1));
                    vars.insert("offset".to_string(), Value::from(0));
                }
            }

            let request = self.build_request(config, &vars)?;
            let response = self.caller.call(&request, options).await.map_err(|e| {
                wrap_with_request(e, &request)
            })?;

            let (page_data, path_ok) =
                match config.data_path.as_deref().filter(|p| !p.is_empty()) {
                    Some(path) => navigate_data_path(&response, path),
                    None => (response, true),
                };
            data_path_success &= path_ok;

            match page_data {
                Value::Array(items) => {
                    // A page identical to everything accumulated so far means
                    // the endpoint ignores paging parameters. Responses that
                    // embed per-call values (timestamps, request ids) defeat
                    // this comparison; it is a heuristic.
                    if !all_results.is_empty()
                        && serde_json::to_string(&items).ok()
                            == serde_json::to_string(&all_results).ok()
                    {
                        log::debug!("pagination: identical page received, stopping");
                        break;
                    }
                    let short_page = items.len() < page_size;
                    all_results.extend(items);
                    if short_page || pagination_type.is_none() {
                        break;
                    }
                }
                other => {
                    if iteration == 0 {
                        scalar_result = Some(other);
                    } else {
                        log::debug!("pagination: non-array page received, stopping");
                    }
                    break;
                }
            }
        }

        let data = match scalar_result {
            Some(value) => value,
            None => {
                if all_results.len() == 1 {
                    all_results.pop().unwrap()
                } else {
                    Value::Array(all_results)
                }
            }
        };

        Ok(ExecutorOutcome {
            data,
            data_path_success,
        })
    }

    /// Interpolate every templated field and assemble the request.
    fn build_request(
        &self,
        config: &ApiConfig,
        vars: &HashMap<String, Value>,
    ) -> MenderResult<HttpRequest> {
        let host = interpolate::interpolate(&config.url_host, vars)?;
        let path = match &config.url_path {
            Some(p) => Some(interpolate::interpolate(p, vars)?),
            None => None,
        };
        let mut request = HttpRequest::new(config.method, compose_url(&host, path.as_deref()));

        if let Some(headers) = &config.headers {
            for (key, value) in headers {
                request
                    .headers
                    .insert(key.clone(), interpolate::interpolate(value, vars)?);
            }
        }
        if let Some(params) = &config.query_params {
            let mut pairs: Vec<(String, String)> = Vec::with_capacity(params.len());
            for (key, value) in params {
                pairs.push((key.clone(), interpolate::interpolate(value, vars)?));
            }
            pairs.sort();
            request.query_params = pairs;
        }
        if let Some(body) = &config.body {
            // Bodies are interpreted as JSON: interpolate with JSON-escaped
            // bindings, parse, and send the serialized form.
            let value = interpolate::interpolate_body(body, vars)?;
            request.body = Some(value.to_string());
        }
        Ok(request)
    }
}

/// Attach the full failing request to an HTTP error so the synthesizer sees
/// what was actually sent.
fn wrap_with_request(error: MenderError, request: &HttpRequest) -> MenderError {
    match error {
        MenderError::Http {
            status,
            body,
            ..
        } => MenderError::Http {
            status,
            body,
            request_summary: format!(
                "{} {} headers={:?} query={:?} body={}",
                request.method.as_str(),
                request.url,
                request.headers,
                request.query_params,
                request.body.as_deref().unwrap_or("")
            ),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{ok_json, StubTransport};
    use crate::http::HttpTransport;
    use crate::types::{HttpMethod, Pagination};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn options() -> CallOptions {
        CallOptions {
            retries: 0,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn executor(transport: Arc<dyn HttpTransport>) -> RequestExecutor {
        RequestExecutor::new(HttpCaller::new(transport))
    }

    fn paged_config(pagination_type: PaginationType, page_size: u32) -> ApiConfig {
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.url_path = Some("/items".to_string());
        config.query_params = Some(HashMap::from([
            ("offset".to_string(), "{offset}".to_string()),
            ("limit".to_string(), "{limit}".to_string()),
        ]));
        config.pagination = Some(Pagination {
            pagination_type,
            page_size,
        });
        config
    }

    fn items(range: std::ops::Range<usize>) -> Value {
        Value::Array(range.map(|i| json!({"id": i})).collect())
    }

    #[tokio::test]
    async fn test_unresolved_variables_abort_before_any_http() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(json!([]))]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.headers = Some(HashMap::from([(
            "Authorization".to_string(),
            "Bearer {apikey}".to_string(),
        )]));
        let err = executor(transport.clone())
            .call(&config, &json!({}), &json!({"token": "x"}), &options())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unresolved variables: apikey"
        );
        assert_eq!(transport.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_offset_pagination_collects_all_pages() {
        // 173 items served 50 at a time: 4 iterations (50+50+50+23).
        let transport = Arc::new(StubTransport::new(vec![
            ok_json(items(0..50)),
            ok_json(items(50..100)),
            ok_json(items(100..150)),
            ok_json(items(150..173)),
        ]));
        let outcome = executor(transport.clone())
            .call(
                &paged_config(PaginationType::OffsetBased, 50),
                &json!({}),
                &json!({}),
                &options(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.data.as_array().unwrap().len(), 173);
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let offsets: Vec<String> = calls
            .iter()
            .map(|c| {
                c.query_params
                    .iter()
                    .find(|(k, _)| k == "offset")
                    .unwrap()
                    .1
                    .clone()
            })
            .collect();
        assert_eq!(offsets, vec!["0", "50", "100", "150"]);
    }

    #[tokio::test]
    async fn test_page_based_pagination_binds_page_from_one() {
        let mut config = paged_config(PaginationType::PageBased, 2);
        config.query_params = Some(HashMap::from([
            ("page".to_string(), "{page}".to_string()),
            ("limit".to_string(), "{limit}".to_string()),
        ]));
        // Second page identical to the accumulated results: terminate.
        let transport = Arc::new(StubTransport::new(vec![
            ok_json(items(0..2)),
            ok_json(items(0..2)),
        ]));
        let outcome = executor(transport.clone())
            .call(&config, &json!({}), &json!({}), &options())
            .await
            .unwrap();
        assert_eq!(outcome.data.as_array().unwrap().len(), 2);
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let pages: Vec<String> = calls
            .iter()
            .map(|c| {
                c.query_params
                    .iter()
                    .find(|(k, _)| k == "page")
                    .unwrap()
                    .1
                    .clone()
            })
            .collect();
        assert_eq!(pages, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_disabled_pagination_executes_exactly_once() {
        let transport = Arc::new(StubTransport::new(vec![
            ok_json(items(0..50)),
            ok_json(items(50..100)),
        ]));
        let outcome = executor(transport.clone())
            .call(
                &paged_config(PaginationType::Disabled, 50),
                &json!({}),
                &json!({}),
                &options(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.data.as_array().unwrap().len(), 50);
        assert_eq!(transport.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scalar_response_returned_as_is() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(
            json!({"total": 7, "status": "ok"}),
        )]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.url_path = Some("/stats".to_string());
        let outcome = executor(transport)
            .call(&config, &json!({}), &json!({}), &options())
            .await
            .unwrap();
        assert_eq!(outcome.data, json!({"total": 7, "status": "ok"}));
    }

    #[tokio::test]
    async fn test_data_path_navigation_and_forgiving_miss() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(
            json!({"data": {"users": [{"id": 1}]}}),
        )]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.data_path = Some("$.data.users".to_string());
        let outcome = executor(transport)
            .call(&config, &json!({}), &json!({}), &options())
            .await
            .unwrap();
        assert!(outcome.data_path_success);
        assert_eq!(outcome.data, json!({"id": 1}));

        // Miss keeps the last valid value and flags the failure.
        let transport = Arc::new(StubTransport::new(vec![ok_json(
            json!({"data": {"users": [{"id": 1}]}}),
        )]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.data_path = Some("data.members".to_string());
        let outcome = executor(transport)
            .call(&config, &json!({}), &json!({}), &options())
            .await
            .unwrap();
        assert!(!outcome.data_path_success);
        assert_eq!(outcome.data, json!({"users": [{"id": 1}]}));
    }

    #[tokio::test]
    async fn test_body_and_url_interpolation() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(json!({"ok": true}))]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.url_path = Some("/orgs/{org}/search".to_string());
        config.method = HttpMethod::POST;
        config.body = Some(r#"{"query": "{q}", "limit": {limit}}"#.to_string());
        let outcome = executor(transport.clone())
            .call(
                &config,
                &json!({"org": "acme", "q": "rust"}),
                &json!({}),
                &options(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.data, json!({"ok": true}));
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].url, "https://api.example.com/orgs/acme/search");
        let sent: Value =
            serde_json::from_str(calls[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({"query": "rust", "limit": 50}));
    }

    #[tokio::test]
    async fn test_body_bindings_with_quotes_stay_valid_json() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(json!({"ok": true}))]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.url_path = Some("/search".to_string());
        config.method = HttpMethod::POST;
        config.body = Some(r#"{"name": "{name}"}"#.to_string());
        executor(transport.clone())
            .call(
                &config,
                &json!({"name": "O\"Brien \\ co"}),
                &json!({}),
                &options(),
            )
            .await
            .unwrap();
        let calls = transport.calls.lock().unwrap();
        let sent: Value =
            serde_json::from_str(calls[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({"name": "O\"Brien \\ co"}));
    }

    #[tokio::test]
    async fn test_body_that_is_not_json_after_interpolation_is_an_error() {
        let transport = Arc::new(StubTransport::new(vec![ok_json(json!({"ok": true}))]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.method = HttpMethod::POST;
        config.body = Some("query={q}".to_string());
        let err = executor(transport.clone())
            .call(&config, &json!({"q": "rust"}), &json!({}), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, MenderError::Parse(_)));
        // Nothing was sent.
        assert_eq!(transport.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_http_failure_carries_request_context() {
        let transport = Arc::new(StubTransport::new(vec![crate::http::HttpResponse {
            status: 404,
            headers: HashMap::new(),
            body: b"not found".to_vec(),
        }]));
        let mut config = ApiConfig::new("cfg", "https://api.example.com");
        config.url_path = Some("/nope".to_string());
        let err = executor(transport)
            .call(&config, &json!({}), &json!({}), &options())
            .await
            .unwrap_err();
        match err {
            MenderError::Http {
                status,
                request_summary,
                ..
            } => {
                assert_eq!(status, 404);
                assert!(request_summary.contains("https://api.example.com/nope"));
                assert!(request_summary.contains("headers="));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_navigate_data_path_with_array_indices() {
        let value = json!({"items": [{"name": "a"}, {"name": "b"}]});
        let (out, ok) = navigate_data_path(&value, "items.1.name");
        assert!(ok);
        assert_eq!(out, json!("b"));
    }
}
