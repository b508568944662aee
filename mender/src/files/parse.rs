//! Parsing stage for file sources: CSV, JSON and XML into JSON values.

use crate::error::{MenderError, MenderResult};
use crate::types::FileType;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Parse decompressed bytes into a JSON value. `Auto` sniffs the format from
/// the first non-whitespace byte: `{` or `[` means JSON, `<` means XML,
/// anything else is treated as CSV.
pub fn parse(bytes: &[u8], file_type: FileType) -> MenderResult<Value> {
    match file_type {
        FileType::Json => parse_json(bytes),
        FileType::Xml => parse_xml(bytes),
        FileType::Csv => parse_csv(bytes),
        FileType::Auto => match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | Some(b'[') => parse_json(bytes),
            Some(b'<') => parse_xml(bytes),
            _ => parse_csv(bytes),
        },
    }
}

fn parse_json(bytes: &[u8]) -> MenderResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| MenderError::Parse(format!("invalid JSON: {}", e)))
}

/// Interpret a loosely-typed CSV field. Numbers and booleans are promoted,
/// empty fields become null, everything else stays a string.
fn type_field(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// CSV with a header row, RFC 4180 quoting. Each record becomes an object
/// keyed by header name; the result is always an array.
fn parse_csv(bytes: &[u8]) -> MenderResult<Value> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| MenderError::Parse(format!("invalid CSV header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| MenderError::Parse(format!("invalid CSV row: {}", e)))?;
        let mut obj = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let raw = record.get(i).unwrap_or("");
            obj.insert(header.to_string(), type_field(raw));
        }
        rows.push(Value::Object(obj));
    }
    Ok(Value::Array(rows))
}

/// Insert a child value under `key`, promoting repeated keys to an array.
fn insert_child(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Collapse a finished element: attribute-less elements holding only text
/// become a plain string, empty elements become null.
fn finish_element(mut map: Map<String, Value>) -> Value {
    if map.is_empty() {
        return Value::Null;
    }
    if map.len() == 1 {
        if let Some(Value::String(_)) = map.get("#text") {
            return map.remove("#text").unwrap();
        }
    }
    Value::Object(map)
}

fn unescape_text(raw: &[u8]) -> MenderResult<String> {
    let s = String::from_utf8_lossy(raw);
    quick_xml::escape::unescape(&s)
        .map(|c| c.into_owned())
        .map_err(|e| MenderError::Parse(format!("invalid XML escape: {}", e)))
}

/// Attribute-preserving XML-to-JSON conversion: attributes are keyed as
/// `@name`, element text as `#text`, repeated children become arrays. The
/// document maps to `{ rootName: value }`.
fn parse_xml(bytes: &[u8]) -> MenderResult<Value> {
    let mut reader = Reader::from_reader(bytes);

    // (element name, accumulated children/attrs) per open element
    let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
    let mut root = Map::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| MenderError::Parse(format!("invalid XML: {}", e)))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut map = Map::new();
                for attr in e.attributes() {
                    let attr =
                        attr.map_err(|e| MenderError::Parse(format!("invalid XML attribute: {}", e)))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    map.insert(key, Value::String(unescape_text(&attr.value)?));
                }
                if matches!(event, Event::Empty(_)) {
                    let value = finish_element(map);
                    match stack.last_mut() {
                        Some((_, parent)) => insert_child(parent, name, value),
                        None => insert_child(&mut root, name, value),
                    }
                } else {
                    stack.push((name, map));
                }
            }
            Event::End(_) => {
                let (name, map) = stack
                    .pop()
                    .ok_or_else(|| MenderError::Parse("unbalanced XML close tag".to_string()))?;
                let value = finish_element(map);
                match stack.last_mut() {
                    Some((_, parent)) => insert_child(parent, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Event::Text(ref t) => {
                // Whitespace between elements is formatting, not data.
                let text = unescape_text(t.as_ref())?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if let Some((_, map)) = stack.last_mut() {
                    match map.get_mut("#text") {
                        Some(Value::String(existing)) => existing.push_str(&text),
                        _ => {
                            map.insert("#text".to_string(), Value::String(text));
                        }
                    }
                }
            }
            Event::CData(ref t) => {
                let text = String::from_utf8_lossy(t.as_ref()).to_string();
                if let Some((_, map)) = stack.last_mut() {
                    match map.get_mut("#text") {
                        Some(Value::String(existing)) => existing.push_str(&text),
                        _ => {
                            map.insert("#text".to_string(), Value::String(text));
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(MenderError::Parse("unclosed XML element".to_string()));
    }
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}], "total": 2});
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert_eq!(parse(&bytes, FileType::Json).unwrap(), doc);
        assert_eq!(parse(&bytes, FileType::Auto).unwrap(), doc);
    }

    #[test]
    fn test_csv_header_row_and_typing() {
        let bytes = b"id,name,active\n1,leela,true\n2,\"fry, philip\",false\n";
        let parsed = parse(bytes, FileType::Csv).unwrap();
        assert_eq!(
            parsed,
            json!([
                {"id": 1, "name": "leela", "active": true},
                {"id": 2, "name": "fry, philip", "active": false},
            ])
        );
    }

    #[test]
    fn test_csv_empty_fields_become_null() {
        let bytes = b"id,note\n1,\n";
        let parsed = parse(bytes, FileType::Csv).unwrap();
        assert_eq!(parsed, json!([{"id": 1, "note": null}]));
    }

    #[test]
    fn test_xml_attributes_and_text_convention() {
        let bytes = br#"<catalog count="2"><item sku="a1">Widget</item><item sku="b2">Gadget</item></catalog>"#;
        let parsed = parse(bytes, FileType::Xml).unwrap();
        assert_eq!(
            parsed,
            json!({
                "catalog": {
                    "@count": "2",
                    "item": [
                        {"@sku": "a1", "#text": "Widget"},
                        {"@sku": "b2", "#text": "Gadget"},
                    ]
                }
            })
        );
    }

    #[test]
    fn test_xml_text_only_element_collapses_to_string() {
        let parsed = parse(b"<root><name>Bender</name></root>", FileType::Xml).unwrap();
        assert_eq!(parsed, json!({"root": {"name": "Bender"}}));
    }

    #[test]
    fn test_auto_sniffing_dispatches_by_leading_byte() {
        assert_eq!(
            parse(b"  [1, 2]", FileType::Auto).unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            parse(b"<r><v>1</v></r>", FileType::Auto).unwrap(),
            json!({"r": {"v": "1"}})
        );
        assert_eq!(
            parse(b"a,b\n1,2\n", FileType::Auto).unwrap(),
            json!([{"a": 1, "b": 2}])
        );
    }
}
