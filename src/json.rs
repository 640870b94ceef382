//! JSON structural equality and JSON path evaluation.

use jsonpath_rust::JsonPath;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Largest operand accepted by an ordered size comparison (`<`, `>=`, ...).
const MAX_ORDERED_SIZE: usize = 256;

/// `@.path.size() <op> N` or `@.path.length() <op> N` inside a filter.
static SIZE_COMPARISON: OnceLock<Option<Regex>> = OnceLock::new();

fn size_comparison_regex() -> Option<&'static Regex> {
    SIZE_COMPARISON
        .get_or_init(|| {
            Regex::new(
                r"(@(?:\.[A-Za-z0-9_\-]+|\[[^\]]*\])*)\.(?:size|length)\(\)\s*(==|!=|>=|<=|>|<)\s*(\d+)",
            )
            .ok()
        })
        .as_ref()
}

/// Options controlling structural JSON comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCompareOptions {
    /// Treat arrays as multisets.
    pub ignore_array_order: bool,
    /// Allow actual objects to carry members the expected object lacks.
    pub ignore_extra_elements: bool,
}

/// Compare two JSON documents structurally.
///
/// Object member order never matters. Numbers compare by value, so `1` and
/// `1.0` are equal.
pub fn json_equals(expected: &Value, actual: &Value, options: JsonCompareOptions) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            if !options.ignore_extra_elements && exp.len() != act.len() {
                return false;
            }
            exp.iter().all(|(key, exp_val)| {
                act.get(key)
                    .is_some_and(|act_val| json_equals(exp_val, act_val, options))
            })
        }
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                return false;
            }
            if options.ignore_array_order {
                let mut used = vec![false; act.len()];
                match_unordered(exp, act, &mut used, options)
            } else {
                exp.iter()
                    .zip(act.iter())
                    .all(|(e, a)| json_equals(e, a, options))
            }
        }
        (Value::Number(exp), Value::Number(act)) => {
            exp == act || matches!((exp.as_f64(), act.as_f64()), (Some(e), Some(a)) if e == a)
        }
        _ => expected == actual,
    }
}

/// Assign every expected element to a distinct actual element, backtracking
/// when a lenient comparison lets one element match several candidates.
fn match_unordered(
    expected: &[Value],
    actual: &[Value],
    used: &mut [bool],
    options: JsonCompareOptions,
) -> bool {
    let Some((first, rest)) = expected.split_first() else {
        return true;
    };

    for (i, candidate) in actual.iter().enumerate() {
        if used[i] || !json_equals(first, candidate, options) {
            continue;
        }
        used[i] = true;
        if match_unordered(rest, actual, used, options) {
            return true;
        }
        used[i] = false;
    }
    false
}

/// Check that a JSON path expression parses.
pub fn validate_json_path(expression: &str) -> Result<(), String> {
    let expression = rewrite_size_comparisons(expression)?;
    let parsed: Result<JsonPath, _> = JsonPath::try_from(expression.as_ref());
    parsed.map(|_| ()).map_err(|e| e.to_string())
}

/// Rewrite `.size()` / `.length()` comparisons into the `size` filter
/// operator that `jsonpath-rust` evaluates.
///
/// `size` only tests equality and accepts a missing field, so every rewrite
/// also requires the field to exist; ordered comparisons expand into a
/// disjunction over the sizes below the bound.
fn rewrite_size_comparisons(expression: &str) -> Result<Cow<'_, str>, String> {
    let Some(regex) = size_comparison_regex() else {
        return Ok(Cow::Borrowed(expression));
    };
    if !regex.is_match(expression) {
        return Ok(Cow::Borrowed(expression));
    }

    let mut rewritten = String::with_capacity(expression.len() * 2);
    let mut last = 0;
    for caps in regex.captures_iter(expression) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        rewritten.push_str(&expression[last..whole.start()]);
        rewritten.push_str(&size_predicate(&caps)?);
        last = whole.end();
    }
    rewritten.push_str(&expression[last..]);
    Ok(Cow::Owned(rewritten))
}

fn size_predicate(caps: &Captures<'_>) -> Result<String, String> {
    let path = &caps[1];
    let operator = &caps[2];
    let bound: usize = caps[3]
        .parse()
        .map_err(|_| format!("size operand `{}` is out of range", &caps[3]))?;

    let any_of = |sizes: std::ops::Range<usize>| {
        sizes
            .map(|n| format!("{} size {}", path, n))
            .collect::<Vec<_>>()
            .join(" || ")
    };
    let ordered = |limit: usize| {
        if limit > MAX_ORDERED_SIZE {
            Err(format!(
                "size comparison `{} {}` exceeds the supported bound of {}",
                operator, bound, MAX_ORDERED_SIZE
            ))
        } else {
            Ok(limit)
        }
    };

    let predicate = match operator {
        "==" => format!("({p} && {p} size {bound})", p = path),
        "!=" => format!("({p} && !({p} size {bound}))", p = path),
        "<" if bound == 0 => format!("({p} && !{p})", p = path),
        "<" => format!("({p} && ({}))", any_of(0..ordered(bound)?), p = path),
        "<=" => format!("({p} && ({}))", any_of(0..ordered(bound)? + 1), p = path),
        ">" => format!("({p} && !({}))", any_of(0..ordered(bound)? + 1), p = path),
        ">=" if bound == 0 => format!("({p})", p = path),
        _ => format!("({p} && !({}))", any_of(0..ordered(bound)?), p = path),
    };
    Ok(predicate)
}

/// Evaluate a JSON path expression and return every selected value.
///
/// A filter applied directly to the root (`$[?(...)]` or `$.[?(...)]`) of an
/// object document evaluates the predicate against the object itself.
/// Returns `None` when the expression does not parse.
pub fn select(document: &Value, expression: &str) -> Option<Vec<Value>> {
    let rewritten = rewrite_size_comparisons(expression).ok()?;
    let path: JsonPath = JsonPath::try_from(rewritten.as_ref()).ok()?;

    let wrapped;
    let target = if document.is_object() && is_root_filter(expression) {
        wrapped = Value::Array(vec![document.clone()]);
        &wrapped
    } else {
        document
    };

    let selected = match path.find(target) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Some(selected)
}

fn is_root_filter(expression: &str) -> bool {
    let trimmed = expression.trim_start();
    trimmed.starts_with("$[?") || trimmed.starts_with("$.[?")
}

/// Render an extracted value for string matching: strings verbatim, anything
/// else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STRICT: JsonCompareOptions = JsonCompareOptions {
        ignore_array_order: false,
        ignore_extra_elements: false,
    };

    #[test]
    fn test_member_order_ignored() {
        let a = json!({"name": "Petri", "text": "Hello World!"});
        let b: Value = serde_json::from_str(r#"{"text": "Hello World!", "name": "Petri"}"#).unwrap();
        assert!(json_equals(&a, &b, STRICT));
        assert!(json_equals(&a, &a, STRICT));
    }

    #[test]
    fn test_array_order() {
        let expected = json!({"messages": ["Hello World!", "foobar"]});
        let actual = json!({"messages": ["foobar", "Hello World!"]});
        assert!(!json_equals(&expected, &actual, STRICT));

        let unordered = JsonCompareOptions {
            ignore_array_order: true,
            ..STRICT
        };
        assert!(json_equals(&expected, &actual, unordered));
    }

    #[test]
    fn test_extra_elements() {
        let expected = json!({"message": "Hello World!"});
        let actual = json!({"message": "Hello World!", "name": "Petri", "nested": {"a": 1}});
        assert!(!json_equals(&expected, &actual, STRICT));

        let lenient = JsonCompareOptions {
            ignore_extra_elements: true,
            ..STRICT
        };
        assert!(json_equals(&expected, &actual, lenient));
        // Extra members are never allowed on the expected side.
        assert!(!json_equals(&actual, &expected, lenient));
    }

    #[test]
    fn test_extra_elements_recursive() {
        let lenient = JsonCompareOptions {
            ignore_extra_elements: true,
            ..STRICT
        };
        let expected = json!({"user": {"name": "Petri"}});
        let actual = json!({"user": {"name": "Petri", "id": 7}});
        assert!(json_equals(&expected, &actual, lenient));
    }

    #[test]
    fn test_unordered_backtracks() {
        let options = JsonCompareOptions {
            ignore_array_order: true,
            ignore_extra_elements: true,
        };
        // {"a":1} matches both actual entries; greedy assignment would fail.
        let expected = json!([{"a": 1}, {"a": 1, "b": 2}]);
        let actual = json!([{"a": 1, "b": 2}, {"a": 1}]);
        assert!(json_equals(&expected, &actual, options));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(json_equals(&json!(1), &json!(1.0), STRICT));
        assert!(!json_equals(&json!(1), &json!(2), STRICT));
        assert!(!json_equals(&json!(1), &json!("1"), STRICT));
    }

    #[test]
    fn test_select_simple_path() {
        let doc = json!({"message": "Hello World!"});
        assert_eq!(select(&doc, "$.message"), Some(vec![json!("Hello World!")]));
        assert_eq!(select(&json!({}), "$.message"), Some(vec![]));
    }

    #[test]
    fn test_select_nested_document() {
        let doc = json!({"message": {"name": "Petri", "text": "Hello World!"}});
        let selected = select(&doc, "$.message").unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0]["name"], "Petri");
    }

    #[test]
    fn test_select_root_filter_on_object() {
        let doc = json!({"message": "Hello World!"});
        assert_eq!(
            select(&doc, "$[?(@.message == 'Hello World!')]").map(|v| v.len()),
            Some(1)
        );
        assert_eq!(
            select(&doc, "$[?(@.message == 'Goodbye')]").map(|v| v.len()),
            Some(0)
        );
    }

    #[test]
    fn test_select_root_filter_with_dot() {
        let doc = json!({"message": "Hello World!"});
        assert_eq!(
            select(&doc, "$.[?(@.message == 'Hello World!')]").map(|v| v.len()),
            Some(1)
        );
        assert_eq!(
            select(&doc, "$.[?(@.message == 'Goodbye')]").map(|v| v.len()),
            Some(0)
        );
    }

    #[test]
    fn test_size_comparisons() {
        let one = json!({"messages": ["Hello World!"]});
        let two = json!({"messages": ["Hello World!", "foobar"]});
        let none = json!({"message": "Hello World!"});
        let count = |doc: &Value, expr: &str| select(doc, expr).map(|v| v.len());

        assert_eq!(count(&one, "$[?(@.messages.size() == 1)]"), Some(1));
        assert_eq!(count(&two, "$[?(@.messages.size() == 1)]"), Some(0));
        assert_eq!(count(&none, "$[?(@.messages.size() == 0)]"), Some(0));

        assert_eq!(count(&two, "$[?(@.messages.length() != 1)]"), Some(1));
        assert_eq!(count(&two, "$[?(@.messages.size() > 1)]"), Some(1));
        assert_eq!(count(&one, "$[?(@.messages.size() > 1)]"), Some(0));
        assert_eq!(count(&one, "$[?(@.messages.size() <= 1)]"), Some(1));
        assert_eq!(count(&two, "$[?(@.messages.size() < 2)]"), Some(0));
        assert_eq!(count(&one, "$[?(@.messages.size() >= 0)]"), Some(1));
    }

    #[test]
    fn test_size_comparison_in_array_filter() {
        let doc = json!({"users": [{"roles": ["a"]}, {"roles": ["a", "b"]}]});
        let selected = select(&doc, "$.users[?(@.roles.size() == 2)]").unwrap();
        assert_eq!(selected, vec![json!({"roles": ["a", "b"]})]);
    }

    #[test]
    fn test_size_comparison_bound() {
        assert!(validate_json_path("$[?(@.items.size() < 10)]").is_ok());
        assert!(validate_json_path("$[?(@.items.size() < 100000)]").is_err());
        assert!(validate_json_path("$[?(@.items.size() == 100000)]").is_ok());
    }

    #[test]
    fn test_invalid_path() {
        assert!(validate_json_path("$.message").is_ok());
        assert!(validate_json_path("$[").is_err());
        assert_eq!(select(&json!({}), "$["), None);
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("text")), "text");
        assert_eq!(render_value(&json!(42)), "42");
        assert_eq!(render_value(&json!({"a": true})), r#"{"a":true}"#);
    }
}
