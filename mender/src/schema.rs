//! JSON Schema validation, schema inference and data sampling.
//!
//! Validation backs two loops: transform outputs are checked against the
//! caller's response schema, and failures are fed back to the model with the
//! failing instance path. Inference produces a compact schema-of-data that
//! tells the model what shape it is mapping *from* without shipping the full
//! payload.

use crate::error::{MenderError, MenderResult};
use crate::jsonata;
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};

/// Validate `instance` against a Draft-07-capable JSON Schema. On failure
/// the first error's instance path and message are reported.
pub fn validate(schema: &Value, instance: &Value) -> MenderResult<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        MenderError::Configuration(format!("invalid response schema: {}", e))
    })?;
    if let Some(error) = validator.iter_errors(instance).next() {
        let path = error.instance_path.to_string();
        return Err(MenderError::MappingValidation {
            path: if path.is_empty() { "$".to_string() } else { path },
            message: error.to_string(),
        });
    }
    Ok(())
}

/// Apply a mapping expression to `data` and validate the result against
/// `schema`. This is the seal on a (schema, mapping) pair: a config whose
/// mapping fails here must go back to the transform synthesizer.
pub fn validate_and_apply(data: &Value, expression: &str, schema: &Value) -> MenderResult<Value> {
    let result = jsonata::apply(data, expression).map_err(|e| MenderError::MappingValidation {
        path: "$".to_string(),
        message: e.to_string(),
    })?;
    validate(schema, &result)?;
    Ok(result)
}

/// Infer a JSON Schema describing the shape of `data`. Arrays are described
/// by their first element only; this is a shape hint for the model, not a
/// contract.
pub fn infer_schema(data: &Value) -> Value {
    match data {
        Value::Null => json!({"type": "null"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                json!({"type": "integer"})
            } else {
                json!({"type": "number"})
            }
        }
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": infer_schema(first)}),
            None => json!({"type": "array"}),
        },
        Value::Object(map) => {
            let mut properties = Map::new();
            for (key, value) in map {
                properties.insert(key.clone(), infer_schema(value));
            }
            json!({"type": "object", "properties": Value::Object(properties)})
        }
    }
}

/// Produce a view of `data` for prompt inclusion: arrays are cut down to at
/// most `max_items` randomly chosen elements (order preserved), and the
/// serialized form is truncated to `max_chars`.
pub fn sample_data(data: &Value, max_items: usize, max_chars: usize) -> String {
    let sampled = sample_value(data, max_items);
    let mut text = serde_json::to_string(&sampled).unwrap_or_default();
    if text.len() > max_chars {
        let mut cut = max_chars;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

fn sample_value(data: &Value, max_items: usize) -> Value {
    match data {
        Value::Array(items) if items.len() > max_items => {
            let mut indices: Vec<usize> = (0..items.len()).collect();
            indices.shuffle(&mut rand::thread_rng());
            let mut chosen: Vec<usize> = indices.into_iter().take(max_items).collect();
            chosen.sort_unstable();
            Value::Array(
                chosen
                    .into_iter()
                    .map(|i| sample_value(&items[i], max_items))
                    .collect(),
            )
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| sample_value(v, max_items)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sample_value(v, max_items)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Canonical JSON: objects with sorted keys, no whitespace. serde_json maps
/// already iterate in insertion order, so re-building through a BTreeMap
/// yields a stable form.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<_, _> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stable id for a synthesized config: MD5 over the canonicalized
/// (instruction, payload shape) pair, so identical requests hit the cache.
pub fn config_fingerprint(instruction: &str, payload: &Value) -> String {
    let key = json!({
        "instruction": instruction,
        "payloadSchema": infer_schema(payload),
    });
    let canonical = canonicalize(&key);
    format!("{:x}", md5::compute(canonical.to_string().as_bytes()))
}

/// Cache key for transform configs: MD5 over (instruction, schema-of-data).
/// Morphologically identical payloads collide by construction; the mapping
/// is still validated against the response schema before reuse.
pub fn transform_cache_id(instruction: &str, data: &Value) -> String {
    config_fingerprint(instruction, data)
}
