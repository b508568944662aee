//! Prompt assembly for the synthesis loops.
//!
//! Prompts state the contract (output shape, variable conventions) and hand
//! the model everything the caller knows: instruction, pre-specified config
//! fields, available variable names and documentation text.

use crate::types::{ApiConfig, ExtractConfig};
use serde_json::Value;

pub(crate) const ENDPOINT_SYSTEM_PROMPT: &str = "\
You configure HTTP API requests from natural-language instructions and API \
documentation. Respond with a single JSON object describing the request: \
urlHost, urlPath, method, headers, queryParams, body, authentication, \
pagination, dataPath and documentationUrl. String values may reference \
variables as {name}; only use variable names listed as available, plus the \
reserved pagination variables {page}, {offset} and {limit}. For HEADER \
authentication put the credential reference in a header value, for \
QUERY_PARAM put it in a query parameter, for OAUTH2 use an Authorization \
header of the form 'Bearer {token_variable}'. Set dataPath to the \
dot-separated path of the payload inside the response. Configure pagination \
only when the documentation describes it.";

pub(crate) const EXTRACT_SYSTEM_PROMPT: &str = "\
You configure file and raw-data extraction from natural-language \
instructions. Respond with a single JSON object: urlHost, urlPath, method, \
headers, queryParams, body, authentication, decompressionMethod (GZIP, \
DEFLATE, ZIP, AUTO or NONE), fileType (CSV, JSON, XML or AUTO) and \
dataPath. String values may reference variables as {name}; only use \
variable names listed as available.";

pub(crate) const TRANSFORM_SYSTEM_PROMPT: &str = "\
You write JSONata expressions that reshape a source JSON document into a \
target JSON Schema. Respond with a JSON object of the form {\"jsonata\": \
string, \"confidence\": number 0-100, \"confidence_reasoning\": string}. \
Only reference fields that exist in the source data. The expression output \
must validate against the target schema.";

pub(crate) const SCHEMA_SYSTEM_PROMPT: &str = "\
You design JSON Schemas. Given an instruction and optionally some sample \
response data, respond with {\"jsonSchema\": <schema>} where <schema> is a \
Draft-07 JSON Schema describing the shape the instruction asks for.";

fn push_field(out: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        out.push_str(label);
        out.push_str(value);
        out.push('\n');
    }
}

fn specified_fields(json: Value) -> String {
    match json {
        Value::Object(map) => {
            let retained: Vec<String> = map
                .into_iter()
                .filter(|(key, value)| {
                    !matches!(key.as_str(), "id" | "createdAt" | "updatedAt" | "instruction")
                        && !value.is_null()
                })
                .map(|(key, value)| format!("  {}: {}", key, value))
                .collect();
            retained.join("\n")
        }
        _ => String::new(),
    }
}

pub(crate) fn endpoint_user_prompt(
    input: &ApiConfig,
    available_vars: &[String],
    documentation: &str,
) -> String {
    let mut out = String::new();
    push_field(&mut out, "Instruction: ", &input.instruction);
    push_field(&mut out, "Base URL: ", &input.url_host);
    let specified = specified_fields(serde_json::to_value(input).unwrap_or(Value::Null));
    if !specified.is_empty() {
        out.push_str("Caller-specified request fields (keep these):\n");
        out.push_str(&specified);
        out.push('\n');
    }
    out.push_str(&format!(
        "Available variables: {}\n",
        if available_vars.is_empty() {
            "(none)".to_string()
        } else {
            available_vars.join(", ")
        }
    ));
    if !documentation.is_empty() {
        out.push_str("API documentation:\n");
        out.push_str(documentation);
        out.push('\n');
    }
    out
}

pub(crate) fn extract_user_prompt(
    input: &ExtractConfig,
    available_vars: &[String],
    documentation: &str,
) -> String {
    let mut out = String::new();
    push_field(&mut out, "Instruction: ", &input.instruction);
    push_field(&mut out, "Source URL: ", &input.url_host);
    let specified = specified_fields(serde_json::to_value(input).unwrap_or(Value::Null));
    if !specified.is_empty() {
        out.push_str("Caller-specified fields (keep these):\n");
        out.push_str(&specified);
        out.push('\n');
    }
    out.push_str(&format!(
        "Available variables: {}\n",
        if available_vars.is_empty() {
            "(none)".to_string()
        } else {
            available_vars.join(", ")
        }
    ));
    if !documentation.is_empty() {
        out.push_str("Source documentation:\n");
        out.push_str(documentation);
        out.push('\n');
    }
    out
}

/// Follow-up turn after a failed execution: the error plus the config that
/// produced it, so the model can see what to change.
pub(crate) fn repair_user_prompt(error: &str, previous: &Value) -> String {
    format!(
        "Executing the previous configuration failed.\nError: {}\nPrevious \
         configuration: {}\nProduce a corrected JSON configuration.",
        error, previous
    )
}

pub(crate) fn transform_user_prompt(
    target_schema: &Value,
    instruction: &str,
    source_schema: &Value,
    sampled_data: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Target schema: {}\n", target_schema));
    if !instruction.is_empty() {
        out.push_str(&format!("Instruction: {}\n", instruction));
    }
    out.push_str(&format!("Source data schema: {}\n", source_schema));
    out.push_str(&format!("Sampled source data: {}\n", sampled_data));
    out
}

pub(crate) fn transform_retry_prompt(error: &str) -> String {
    format!(
        "That expression failed: {}\nProduce a corrected JSONata expression \
         in the same JSON format.",
        error
    )
}

pub(crate) fn schema_user_prompt(instruction: &str, response_data: Option<&str>) -> String {
    let mut out = format!("Instruction: {}\n", instruction);
    if let Some(sample) = response_data {
        out.push_str(&format!("Sample response data: {}\n", sample));
    }
    out
}

pub(crate) fn schema_retry_prompt(error: &str) -> String {
    format!(
        "That schema was not usable: {}\nRespond again with {{\"jsonSchema\": \
         <valid JSON Schema>}}.",
        error
    )
}
