//! Tree-walking evaluator with JSONata sequence semantics.
//!
//! `Option<Value>` models JSONata's "undefined": a missing field or an empty
//! filter result is `None`, which propagates through paths and is omitted by
//! object/array constructors. Singleton sequences collapse to their value.

use super::parser::{BinOp, Expr};
use super::JsonataError;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

type EvalResult = Result<Option<Value>, JsonataError>;

struct Scope<'a> {
    root: &'a Value,
    vars: HashMap<String, Value>,
}

pub fn evaluate(expr: &Expr, data: &Value) -> EvalResult {
    let scope = Scope {
        root: data,
        vars: HashMap::new(),
    };
    eval(expr, data, &scope)
}

/// Treat a value as a sequence of items.
fn as_seq(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Collapse a sequence back into a value: empty is undefined, a singleton is
/// its sole item, anything else an array.
fn seq_to_value(mut seq: Vec<Value>) -> Option<Value> {
    match seq.len() {
        0 => None,
        1 => Some(seq.pop().unwrap()),
        _ => Some(Value::Array(seq)),
    }
}

/// Whole-number arithmetic results are represented as integers so that
/// mapped output serializes without a spurious fractional part.
fn number_value(n: f64) -> Result<Value, JsonataError> {
    if !n.is_finite() {
        return Err(JsonataError::Eval(
            "arithmetic produced a non-finite number".to_string(),
        ));
    }
    if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 {
        Ok(Value::Number(Number::from(n as i64)))
    } else {
        Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| JsonataError::Eval("invalid number result".to_string()))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// JSONata `$string` semantics; structures serialize as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, v)| ym.get(k).map(|w| value_eq(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Field access with one level of array flattening, per path semantics.
fn lookup(ctx: &Value, name: &str) -> Option<Value> {
    match ctx {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                if let Some(v) = lookup(item, name) {
                    match v {
                        Value::Array(inner) => out.extend(inner),
                        v => out.push(v),
                    }
                }
            }
            seq_to_value(out)
        }
        _ => None,
    }
}

fn eval(expr: &Expr, ctx: &Value, scope: &Scope) -> EvalResult {
    match expr {
        Expr::Num(n) => number_value(*n).map(Some),
        Expr::Str(s) => Ok(Some(Value::String(s.clone()))),
        Expr::Bool(b) => Ok(Some(Value::Bool(*b))),
        Expr::Null => Ok(Some(Value::Null)),
        Expr::Name(name) => Ok(lookup(ctx, name)),
        Expr::ContextRef => Ok(Some(ctx.clone())),
        Expr::RootRef => Ok(Some(scope.root.clone())),
        Expr::VarRef(name) => match scope.vars.get(name) {
            Some(v) => Ok(Some(v.clone())),
            None => Err(JsonataError::Eval(format!("unknown variable ${}", name))),
        },
        Expr::Path(lhs, rhs) => {
            let left = match eval(lhs, ctx, scope)? {
                Some(v) => v,
                None => return Ok(None),
            };
            // Array constructors on the right keep their per-item arrays;
            // everything else flattens one level into the result sequence.
            let flatten = !matches!(**rhs, Expr::ArrayCtor(_));
            let mut out = Vec::new();
            for item in as_seq(left) {
                if let Some(r) = eval(rhs, &item, scope)? {
                    if flatten {
                        match r {
                            Value::Array(inner) => out.extend(inner),
                            v => out.push(v),
                        }
                    } else {
                        out.push(r);
                    }
                }
            }
            Ok(seq_to_value(out))
        }
        Expr::Filter(lhs, pred) => {
            let left = match eval(lhs, ctx, scope)? {
                Some(v) => v,
                None => return Ok(None),
            };
            let items = as_seq(left);
            let len = items.len() as i64;
            let mut out = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                match eval(pred, &item, scope)? {
                    Some(Value::Number(n)) => {
                        // Numeric predicate selects by index, negative from
                        // the end.
                        let idx = n.as_f64().unwrap_or(f64::NAN).floor() as i64;
                        let idx = if idx < 0 { len + idx } else { idx };
                        if i as i64 == idx {
                            out.push(item);
                        }
                    }
                    Some(v) if truthy(&v) => out.push(item),
                    _ => {}
                }
            }
            Ok(seq_to_value(out))
        }
        Expr::Neg(operand) => match eval(operand, ctx, scope)? {
            None => Ok(None),
            Some(Value::Number(n)) => {
                number_value(-n.as_f64().unwrap_or(f64::NAN)).map(Some)
            }
            Some(other) => Err(JsonataError::Eval(format!(
                "cannot negate {}",
                type_name(&other)
            ))),
        },
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx, scope),
        Expr::Conditional {
            cond,
            then_branch,
            else_branch,
        } => {
            let test = eval(cond, ctx, scope)?.map(|v| truthy(&v)).unwrap_or(false);
            if test {
                eval(then_branch, ctx, scope)
            } else {
                match else_branch {
                    Some(e) => eval(e, ctx, scope),
                    None => Ok(None),
                }
            }
        }
        Expr::ObjectCtor(pairs) => {
            let mut map = Map::new();
            for (key_expr, value_expr) in pairs {
                let key = match eval(key_expr, ctx, scope)? {
                    Some(Value::String(s)) => s,
                    Some(other) => stringify(&other),
                    None => {
                        return Err(JsonataError::Eval(
                            "object key evaluated to no value".to_string(),
                        ))
                    }
                };
                // Undefined values are omitted, matching JSONata.
                if let Some(value) = eval(value_expr, ctx, scope)? {
                    map.insert(key, value);
                }
            }
            Ok(Some(Value::Object(map)))
        }
        Expr::ArrayCtor(items) => {
            let mut out = Vec::new();
            for item in items {
                if let Some(v) = eval(item, ctx, scope)? {
                    out.push(v);
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Expr::Call(name, args) => eval_call(name, args, ctx, scope),
        Expr::Lambda { .. } => Err(JsonataError::Eval(
            "lambdas are only allowed as function arguments".to_string(),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &Value, scope: &Scope) -> EvalResult {
    match op {
        BinOp::Concat => {
            let left = eval(lhs, ctx, scope)?.map(|v| stringify(&v)).unwrap_or_default();
            let right = eval(rhs, ctx, scope)?.map(|v| stringify(&v)).unwrap_or_default();
            Ok(Some(Value::String(left + &right)))
        }
        BinOp::And | BinOp::Or => {
            let left = eval(lhs, ctx, scope)?.map(|v| truthy(&v)).unwrap_or(false);
            let result = if op == BinOp::And {
                left && eval(rhs, ctx, scope)?.map(|v| truthy(&v)).unwrap_or(false)
            } else {
                left || eval(rhs, ctx, scope)?.map(|v| truthy(&v)).unwrap_or(false)
            };
            Ok(Some(Value::Bool(result)))
        }
        BinOp::In => {
            let (left, right) = (eval(lhs, ctx, scope)?, eval(rhs, ctx, scope)?);
            match (left, right) {
                (Some(needle), Some(haystack)) => {
                    let found = as_seq(haystack).iter().any(|v| value_eq(v, &needle));
                    Ok(Some(Value::Bool(found)))
                }
                _ => Ok(Some(Value::Bool(false))),
            }
        }
        BinOp::Eq | BinOp::Ne => {
            let (left, right) = (eval(lhs, ctx, scope)?, eval(rhs, ctx, scope)?);
            match (left, right) {
                (Some(a), Some(b)) => {
                    let eq = value_eq(&a, &b);
                    Ok(Some(Value::Bool(if op == BinOp::Eq { eq } else { !eq })))
                }
                (None, None) => Ok(None),
                _ => Ok(Some(Value::Bool(op == BinOp::Ne))),
            }
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (left, right) = (eval(lhs, ctx, scope)?, eval(rhs, ctx, scope)?);
            let (a, b) = match (left, right) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(None),
            };
            let ordering = match (&a, &b) {
                (Value::Number(x), Value::Number(y)) => x
                    .as_f64()
                    .unwrap_or(f64::NAN)
                    .partial_cmp(&y.as_f64().unwrap_or(f64::NAN)),
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => {
                    return Err(JsonataError::Eval(format!(
                        "cannot compare {} with {}",
                        type_name(&a),
                        type_name(&b)
                    )))
                }
            };
            let ordering = match ordering {
                Some(o) => o,
                None => return Ok(None),
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Some(Value::Bool(result)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (left, right) = (eval(lhs, ctx, scope)?, eval(rhs, ctx, scope)?);
            let (a, b) = match (left, right) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(None),
            };
            let (x, y) = match (&a, &b) {
                (Value::Number(x), Value::Number(y)) => (
                    x.as_f64().unwrap_or(f64::NAN),
                    y.as_f64().unwrap_or(f64::NAN),
                ),
                _ => {
                    return Err(JsonataError::Eval(format!(
                        "arithmetic requires numbers, found {} and {}",
                        type_name(&a),
                        type_name(&b)
                    )))
                }
            };
            let result = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                _ => x % y,
            };
            number_value(result).map(Some)
        }
    }
}

/// Invoke a lambda with positional arguments bound to its parameters.
fn call_lambda(
    params: &[String],
    body: &Expr,
    args: &[Value],
    ctx: &Value,
    scope: &Scope,
) -> EvalResult {
    let mut vars = scope.vars.clone();
    for (param, arg) in params.iter().zip(args) {
        vars.insert(param.clone(), arg.clone());
    }
    let inner = Scope {
        root: scope.root,
        vars,
    };
    eval(body, ctx, &inner)
}

fn expect_args(name: &str, args: &[Expr], min: usize, max: usize) -> Result<(), JsonataError> {
    if args.len() < min || args.len() > max {
        return Err(JsonataError::Eval(format!(
            "${} expects {}..{} arguments, found {}",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn eval_call(name: &str, args: &[Expr], ctx: &Value, scope: &Scope) -> EvalResult {
    match name {
        "map" | "filter" => {
            expect_args(name, args, 2, 2)?;
            let seq = match eval(&args[0], ctx, scope)? {
                Some(v) => as_seq(v),
                None => return Ok(None),
            };
            let (params, body) = match &args[1] {
                Expr::Lambda { params, body } => (params, body.as_ref()),
                _ => {
                    return Err(JsonataError::Eval(format!(
                        "${} requires a function literal as its second argument",
                        name
                    )))
                }
            };
            let mut out = Vec::new();
            for (i, item) in seq.iter().enumerate() {
                let lambda_args = [item.clone(), Value::from(i)];
                let result = call_lambda(params, body, &lambda_args, ctx, scope)?;
                if name == "map" {
                    if let Some(v) = result {
                        out.push(v);
                    }
                } else if result.map(|v| truthy(&v)).unwrap_or(false) {
                    out.push(item.clone());
                }
            }
            Ok(seq_to_value(out))
        }
        "sum" => {
            expect_args(name, args, 1, 1)?;
            let seq = match eval(&args[0], ctx, scope)? {
                Some(v) => as_seq(v),
                None => return Ok(None),
            };
            let mut total = 0.0;
            for v in &seq {
                match v {
                    Value::Number(n) => total += n.as_f64().unwrap_or(f64::NAN),
                    other => {
                        return Err(JsonataError::Eval(format!(
                            "$sum requires numbers, found {}",
                            type_name(other)
                        )))
                    }
                }
            }
            number_value(total).map(Some)
        }
        "count" => {
            expect_args(name, args, 1, 1)?;
            let count = match eval(&args[0], ctx, scope)? {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };
            Ok(Some(Value::from(count)))
        }
        "distinct" => {
            expect_args(name, args, 1, 1)?;
            let seq = match eval(&args[0], ctx, scope)? {
                Some(v) => as_seq(v),
                None => return Ok(None),
            };
            let mut out: Vec<Value> = Vec::new();
            for v in seq {
                if !out.iter().any(|seen| value_eq(seen, &v)) {
                    out.push(v);
                }
            }
            Ok(seq_to_value(out))
        }
        "lookup" => {
            expect_args(name, args, 2, 2)?;
            let target = eval(&args[0], ctx, scope)?;
            let key = match eval(&args[1], ctx, scope)? {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(JsonataError::Eval(
                        "$lookup requires a string key".to_string(),
                    ))
                }
            };
            Ok(target.and_then(|t| lookup(&t, &key)))
        }
        "string" => {
            expect_args(name, args, 1, 1)?;
            Ok(eval(&args[0], ctx, scope)?.map(|v| Value::String(stringify(&v))))
        }
        "number" => {
            expect_args(name, args, 1, 1)?;
            match eval(&args[0], ctx, scope)? {
                None => Ok(None),
                Some(Value::Number(n)) => Ok(Some(Value::Number(n))),
                Some(Value::Bool(b)) => Ok(Some(Value::from(if b { 1 } else { 0 }))),
                Some(Value::String(s)) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        JsonataError::Eval(format!("$number cannot parse '{}'", s))
                    })?;
                    number_value(parsed).map(Some)
                }
                Some(other) => Err(JsonataError::Eval(format!(
                    "$number cannot convert {}",
                    type_name(&other)
                ))),
            }
        }
        "boolean" => {
            expect_args(name, args, 1, 1)?;
            Ok(eval(&args[0], ctx, scope)?.map(|v| Value::Bool(truthy(&v))))
        }
        "exists" => {
            expect_args(name, args, 1, 1)?;
            Ok(Some(Value::Bool(eval(&args[0], ctx, scope)?.is_some())))
        }
        "split" => {
            expect_args(name, args, 2, 3)?;
            let s = require_string(name, eval(&args[0], ctx, scope)?)?;
            let sep = require_string(name, eval(&args[1], ctx, scope)?)?;
            let mut parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(&sep).map(|p| Value::String(p.to_string())).collect()
            };
            if args.len() == 3 {
                if let Some(Value::Number(n)) = eval(&args[2], ctx, scope)? {
                    let limit = n.as_f64().unwrap_or(0.0).max(0.0) as usize;
                    parts.truncate(limit);
                }
            }
            Ok(Some(Value::Array(parts)))
        }
        "join" => {
            expect_args(name, args, 1, 2)?;
            let seq = match eval(&args[0], ctx, scope)? {
                Some(v) => as_seq(v),
                None => return Ok(None),
            };
            let sep = if args.len() == 2 {
                require_string(name, eval(&args[1], ctx, scope)?)?
            } else {
                String::new()
            };
            let joined = seq
                .iter()
                .map(stringify)
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Some(Value::String(joined)))
        }
        "uppercase" | "lowercase" | "trim" => {
            expect_args(name, args, 1, 1)?;
            match eval(&args[0], ctx, scope)? {
                None => Ok(None),
                Some(v) => {
                    let s = match v {
                        Value::String(s) => s,
                        other => stringify(&other),
                    };
                    let out = match name {
                        "uppercase" => s.to_uppercase(),
                        "lowercase" => s.to_lowercase(),
                        _ => s.trim().to_string(),
                    };
                    Ok(Some(Value::String(out)))
                }
            }
        }
        "substring" => {
            expect_args(name, args, 2, 3)?;
            let s = require_string(name, eval(&args[0], ctx, scope)?)?;
            let chars: Vec<char> = s.chars().collect();
            let start = match eval(&args[1], ctx, scope)? {
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as i64,
                _ => 0,
            };
            let start = if start < 0 {
                (chars.len() as i64 + start).max(0) as usize
            } else {
                (start as usize).min(chars.len())
            };
            let end = if args.len() == 3 {
                match eval(&args[2], ctx, scope)? {
                    Some(Value::Number(n)) => {
                        (start + n.as_f64().unwrap_or(0.0).max(0.0) as usize).min(chars.len())
                    }
                    _ => chars.len(),
                }
            } else {
                chars.len()
            };
            Ok(Some(Value::String(chars[start..end].iter().collect())))
        }
        "contains" => {
            expect_args(name, args, 2, 2)?;
            let s = require_string(name, eval(&args[0], ctx, scope)?)?;
            let pat = require_string(name, eval(&args[1], ctx, scope)?)?;
            Ok(Some(Value::Bool(s.contains(&pat))))
        }
        "match" => {
            expect_args(name, args, 2, 2)?;
            let s = require_string(name, eval(&args[0], ctx, scope)?)?;
            let pattern = require_string(name, eval(&args[1], ctx, scope)?)?;
            let re = Regex::new(&pattern)
                .map_err(|e| JsonataError::Eval(format!("invalid regex: {}", e)))?;
            let mut out = Vec::new();
            for caps in re.captures_iter(&s) {
                let whole = caps.get(0).unwrap();
                let groups: Vec<Value> = caps
                    .iter()
                    .skip(1)
                    .map(|g| {
                        g.map(|m| Value::String(m.as_str().to_string()))
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                out.push(serde_json::json!({
                    "match": whole.as_str(),
                    "index": whole.start(),
                    "groups": groups,
                }));
            }
            if out.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Value::Array(out)))
            }
        }
        other => Err(JsonataError::Eval(format!("unknown function ${}", other))),
    }
}

fn require_string(fname: &str, value: Option<Value>) -> Result<String, JsonataError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(JsonataError::Eval(format!(
            "${} requires a string, found {}",
            fname,
            type_name(&other)
        ))),
        None => Err(JsonataError::Eval(format!(
            "${} requires a string, found no value",
            fname
        ))),
    }
}
