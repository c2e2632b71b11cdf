//! Structural matching of message bodies against partial templates.
//!
//! A permission rule may carry a `match` template: a JSON object listing the
//! fields a body must contain.  The body may contain more fields than the
//! template; it may not contain different values for the fields it names.
//!
//! ```text
//! template {"a":{"b":1}}
//!   matches   {"a":{"b":1,"c":2},"d":3}
//!   rejects   {"a":{"b":2}}
//!   rejects   {"d":3}                      (missing field)
//!   rejects   "hello"                      (not an object)
//! ```

use serde_json::{Map, Value};

/// Returns `true` when `body` satisfies `template`.
///
/// - No template, or no body (`None` / JSON `null`): always matches.  This is
///   what lets a `register` (which has no body) be gated on address alone.
/// - An empty template matches anything.
/// - A body that is not a JSON object never matches a non-empty template.
/// - Template fields holding objects are matched recursively; every other
///   template value must be equal to the body's value.
pub fn structure_matches(template: Option<&Map<String, Value>>, body: Option<&Value>) -> bool {
    let Some(template) = template else {
        return true;
    };
    match body {
        None | Some(Value::Null) => true,
        Some(body) => object_matches(template, body),
    }
}

fn object_matches(template: &Map<String, Value>, body: &Value) -> bool {
    if template.is_empty() {
        return true;
    }
    let Value::Object(body) = body else {
        return false;
    };

    template.iter().all(|(field, expected)| match (expected, body.get(field)) {
        (_, None) => false,
        (Value::Object(nested), Some(actual)) => object_matches(nested, actual),
        (expected, Some(actual)) => expected == actual,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_no_template_matches_anything() {
        assert!(structure_matches(None, Some(&json!("text"))));
        assert!(structure_matches(None, Some(&json!({"a": 1}))));
    }

    #[test]
    fn test_no_body_matches_any_template() {
        let t = template(json!({"a": 1}));
        assert!(structure_matches(Some(&t), None));
        assert!(structure_matches(Some(&t), Some(&Value::Null)));
    }

    #[test]
    fn test_empty_template_matches_non_object_body() {
        let t = Map::new();
        assert!(structure_matches(Some(&t), Some(&json!(42))));
    }

    #[test]
    fn test_non_object_body_fails_non_empty_template() {
        let t = template(json!({"a": 1}));
        assert!(!structure_matches(Some(&t), Some(&json!("a"))));
        assert!(!structure_matches(Some(&t), Some(&json!([1, 2]))));
    }

    #[test]
    fn test_nested_template_matches_superset_body() {
        // Arrange
        let t = template(json!({"a": {"b": 1}}));
        let body = json!({"a": {"b": 1, "c": 2}, "d": 3});

        // Act / Assert
        assert!(structure_matches(Some(&t), Some(&body)));
    }

    #[test]
    fn test_nested_template_rejects_different_value() {
        let t = template(json!({"a": {"b": 1}}));
        assert!(!structure_matches(Some(&t), Some(&json!({"a": {"b": 2}}))));
    }

    #[test]
    fn test_missing_field_fails() {
        let t = template(json!({"a": 1}));
        assert!(!structure_matches(Some(&t), Some(&json!({"b": 1}))));
    }

    #[test]
    fn test_missing_nested_object_fails() {
        let t = template(json!({"a": {"b": 1}}));
        assert!(!structure_matches(Some(&t), Some(&json!({"d": 3}))));
    }

    #[test]
    fn test_nested_template_against_scalar_field_fails() {
        let t = template(json!({"a": {"b": 1}}));
        assert!(!structure_matches(Some(&t), Some(&json!({"a": 5}))));
    }

    #[test]
    fn test_array_values_compare_by_equality() {
        let t = template(json!({"tags": ["x", "y"]}));
        assert!(structure_matches(Some(&t), Some(&json!({"tags": ["x", "y"]}))));
        assert!(!structure_matches(Some(&t), Some(&json!({"tags": ["y", "x"]}))));
    }

    #[test]
    fn test_scalar_types_are_not_coerced() {
        let t = template(json!({"n": 1}));
        assert!(!structure_matches(Some(&t), Some(&json!({"n": "1"}))));
    }
}
