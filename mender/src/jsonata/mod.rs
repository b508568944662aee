//! A small tree-walking interpreter for the JSONata subset used by response
//! mappings.
//!
//! Responsibilities:
//! - Parse a mapping expression into an AST (lexer + Pratt parser).
//! - Evaluate the AST against a JSON value with JSONata's sequence
//!   semantics: path steps map over arrays and flatten one level, empty
//!   results are "undefined", singleton sequences collapse to their value.
//!
//! Supported surface: path navigation with predicates, object/array
//! constructors, `&` string concatenation, arithmetic, comparisons, `in`,
//! `and`/`or`, `? :` conditionals, lambdas, and the function library
//! (`$map`, `$filter`, `$sum`, `$count`, `$distinct`, `$lookup`, `$string`,
//! `$number`, `$boolean`, `$exists`, `$split`, `$join`, `$uppercase`,
//! `$lowercase`, `$trim`, `$substring`, `$match`, `$contains`).
//!
//! No port of the reference implementation exists in the ecosystem we build
//! against, so the engine is written from scratch and kept deliberately
//! small.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use std::fmt;

pub use parser::Expr;

/// Expression parse or evaluation failure. The message is surfaced into the
/// transform repair loop, so it should name the offending construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonataError {
    Parse(String),
    Eval(String),
}

impl fmt::Display for JsonataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonataError::Parse(msg) => write!(f, "expression parse error: {}", msg),
            JsonataError::Eval(msg) => write!(f, "expression evaluation error: {}", msg),
        }
    }
}

impl std::error::Error for JsonataError {}

/// Parse an expression without evaluating it. Useful for validating
/// caller-supplied mappings early.
pub fn parse(expression: &str) -> Result<Expr, JsonataError> {
    parser::parse(expression)
}

/// Apply `expression` to `data`. An empty (undefined) result maps to JSON
/// null at this boundary.
pub fn apply(data: &Value, expression: &str) -> Result<Value, JsonataError> {
    let ast = parser::parse(expression)?;
    let result = eval::evaluate(&ast, data)?;
    Ok(result.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "user": {"first": "J", "last": "D", "age": 30},
            "orders": [
                {"id": 1, "total": 10.5, "status": "paid"},
                {"id": 2, "total": 4.5, "status": "open"},
                {"id": 3, "total": 20.0, "status": "paid"}
            ]
        })
    }

    #[test]
    fn test_field_access_and_concat() {
        let out = apply(&data(), r#"user.first & " " & user.last"#).unwrap();
        assert_eq!(out, json!("J D"));
    }

    #[test]
    fn test_path_over_array_flattens() {
        let out = apply(&data(), "orders.id").unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn test_singleton_sequence_collapses() {
        let out = apply(&data(), "orders[0].id").unwrap();
        assert_eq!(out, json!(1));
    }

    #[test]
    fn test_filter_predicate() {
        let out = apply(&data(), r#"orders[status = "paid"].total"#).unwrap();
        assert_eq!(out, json!([10.5, 20.0]));
    }

    #[test]
    fn test_negative_index() {
        let out = apply(&data(), "orders[-1].id").unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn test_object_constructor_maps_over_items() {
        let out = apply(&data(), r#"orders.{ "orderId": id, "paid": status = "paid" }"#).unwrap();
        assert_eq!(
            out,
            json!([
                {"orderId": 1, "paid": true},
                {"orderId": 2, "paid": false},
                {"orderId": 3, "paid": true}
            ])
        );
    }

    #[test]
    fn test_aggregates_and_arithmetic() {
        // Whole-number arithmetic results normalize to integers.
        assert_eq!(apply(&data(), "$sum(orders.total)").unwrap(), json!(35));
        assert_eq!(apply(&data(), "$count(orders)").unwrap(), json!(3));
        assert_eq!(apply(&data(), "user.age * 2 + 1").unwrap(), json!(61));
        assert_eq!(apply(&data(), "user.age % 7").unwrap(), json!(2));
    }

    #[test]
    fn test_map_filter_with_lambdas() {
        let out = apply(&data(), "$map(orders, function($o) { $o.total * 2 })").unwrap();
        assert_eq!(out, json!([21, 9, 40]));
        let out = apply(&data(), "$filter(orders, function($o) { $o.total > 5 }).id").unwrap();
        assert_eq!(out, json!([1, 3]));
    }

    #[test]
    fn test_distinct_and_lookup() {
        assert_eq!(
            apply(&data(), "$distinct(orders.status)").unwrap(),
            json!(["paid", "open"])
        );
        assert_eq!(
            apply(&data(), r#"$lookup(user, "first")"#).unwrap(),
            json!("J")
        );
    }

    #[test]
    fn test_conditional() {
        let out = apply(&data(), r#"user.age > 18 ? "adult" : "minor""#).unwrap();
        assert_eq!(out, json!("adult"));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            apply(&data(), r#"$uppercase(user.first) & $lowercase("X")"#).unwrap(),
            json!("Jx")
        );
        assert_eq!(
            apply(&data(), r#"$join($split("a,b,c", ","), "-")"#).unwrap(),
            json!("a-b-c")
        );
    }

    #[test]
    fn test_regex_match_and_contains() {
        assert_eq!(
            apply(&data(), r#"$contains(user.first, "J")"#).unwrap(),
            json!(true)
        );
        let matches = apply(&json!({"s": "a1b2"}), r#"$match(s, "[0-9]")"#).unwrap();
        assert_eq!(
            matches,
            json!([
                {"match": "1", "index": 1, "groups": []},
                {"match": "2", "index": 3, "groups": []}
            ])
        );
    }

    #[test]
    fn test_missing_field_is_undefined_not_error() {
        assert_eq!(apply(&data(), "user.missing").unwrap(), json!(null));
        // Undefined stringifies to "" in concatenation.
        assert_eq!(apply(&data(), r#"user.missing & "x""#).unwrap(), json!("x"));
    }

    #[test]
    fn test_root_variable() {
        let out = apply(&data(), "orders.{ \"id\": id, \"who\": $$.user.first }").unwrap();
        assert_eq!(
            out,
            json!([
                {"id": 1, "who": "J"},
                {"id": 2, "who": "J"},
                {"id": 3, "who": "J"}
            ])
        );
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(
            apply(&data(), r#""paid" in orders.status"#).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_unknown_field_reference_in_strict_mapping() {
        // The transform loop depends on bad field names producing undefined
        // (and so failing schema validation) rather than silently passing.
        let out = apply(
            &json!({"user": {"first": "J", "last": "D"}}),
            "user.firstName & user.lastName",
        )
        .unwrap();
        assert_eq!(out, json!(""));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = apply(&data(), "user.{").unwrap_err();
        assert!(matches!(err, JsonataError::Parse(_)));
    }
}
