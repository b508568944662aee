//! Variable interpolation for request templates.
//!
//! Responsibilities:
//! - Replace `{name}` placeholders in template strings from a variable map.
//! - Detect placeholders that no binding covers before any HTTP is sent.
//!
//! The pagination variables `page`, `offset` and `limit` are reserved: they
//! are always considered bound because the executor injects them per
//! iteration.

use crate::error::{MenderError, MenderResult};
use crate::types::ApiConfig;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Placeholder names the executor binds itself on every pagination iteration.
pub const RESERVED_VARS: [&str; 3] = ["page", "offset", "limit"];

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

/// Stringify a bound value for substitution. Only scalars may be spliced
/// into a template; objects and arrays are a configuration error.
fn stringify(name: &str, value: &Value) -> MenderResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Array(_) | Value::Object(_) => Err(MenderError::Configuration(format!(
            "variable '{}' is not a scalar and cannot be interpolated",
            name
        ))),
    }
}

/// Replace every `{name}` in `template` with the stringified value bound in
/// `vars`. Placeholders without a binding are left literal so that a later
/// validation pass can report them by name.
pub fn interpolate(template: &str, vars: &HashMap<String, Value>) -> MenderResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        out.push_str(&template[last..whole.start()]);
        match vars.get(name) {
            Some(value) => out.push_str(&stringify(name, value)?),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Substitution fragment for a JSON body context: string values are escaped
/// so that quotes and backslashes in bindings cannot break out of the
/// surrounding JSON string literal.
fn json_fragment(name: &str, value: &Value) -> MenderResult<String> {
    match value {
        Value::String(s) => {
            // serde escapes and quotes; templates supply the quotes, so
            // keep only the inner content.
            let quoted = serde_json::to_string(s)
                .map_err(|e| MenderError::Configuration(e.to_string()))?;
            Ok(quoted[1..quoted.len() - 1].to_string())
        }
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Array(_) | Value::Object(_) => Err(MenderError::Configuration(format!(
            "variable '{}' is not a scalar and cannot be interpolated",
            name
        ))),
    }
}

/// Interpolate a request-body template and parse the result as JSON. Bodies
/// are always interpreted as JSON; a template that does not parse after
/// substitution is an error, not something to send upstream.
pub fn interpolate_body(template: &str, vars: &HashMap<String, Value>) -> MenderResult<Value> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        out.push_str(&template[last..whole.start()]);
        match vars.get(name) {
            Some(value) => out.push_str(&json_fragment(name, value)?),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    serde_json::from_str(&out).map_err(|e| {
        MenderError::Parse(format!(
            "request body is not valid JSON after interpolation: {}",
            e
        ))
    })
}

/// Collect the placeholder names referenced by a template string.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Return the placeholder names referenced by any of `templates` that are
/// not covered by `known_vars` or the reserved pagination variables. An
/// empty result means execution may proceed.
pub fn unbound_in<'a>(
    templates: impl IntoIterator<Item = &'a str>,
    known_vars: &[String],
) -> Vec<String> {
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    for template in templates {
        referenced.extend(placeholders(template));
    }
    referenced
        .into_iter()
        .filter(|name| {
            !RESERVED_VARS.contains(&name.as_str()) && !known_vars.iter().any(|k| k == name)
        })
        .collect()
}

/// Unbound placeholders across a request config's URL, header values, query
/// values and body.
pub fn validate_config(config: &ApiConfig, known_vars: &[String]) -> Vec<String> {
    unbound_in(config_templates(config), known_vars)
}

fn config_templates(config: &ApiConfig) -> Vec<&str> {
    let mut templates: Vec<&str> = vec![config.url_host.as_str()];
    if let Some(path) = &config.url_path {
        templates.push(path);
    }
    if let Some(headers) = &config.headers {
        templates.extend(headers.values().map(|v| v.as_str()));
    }
    if let Some(params) = &config.query_params {
        templates.extend(params.values().map(|v| v.as_str()));
    }
    if let Some(body) = &config.body {
        templates.push(body);
    }
    templates
}
