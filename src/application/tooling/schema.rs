//! JSON-Schema normalization for model-facing tool parameters.
//!
//! Tool servers emit whatever schema dialect their SDK prefers; the model
//! APIs downstream accept only the boolean-flag exclusive-bound dialect and
//! reject a `"required": null`. Normalizing once here means every consumer
//! sees a single dialect.

use serde_json::Value;

/// Rewrites a schema in place:
/// - numeric `exclusiveMinimum`/`exclusiveMaximum` (draft-07 style) move
///   their value into `minimum`/`maximum` with the exclusive key set `true`
/// - a `required` that is not an array is dropped
/// - recursion descends into `properties`, `items`, `additionalProperties`
///   and each of `allOf`/`anyOf`/`oneOf`/`not`
///
/// Idempotent: normalizing a normalized schema changes nothing.
pub fn normalize_schema(schema: &mut Value) {
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    rewrite_exclusive_bound(object, "exclusiveMinimum", "minimum");
    rewrite_exclusive_bound(object, "exclusiveMaximum", "maximum");

    if let Some(required) = object.get("required") {
        if !required.is_array() {
            object.remove("required");
        }
    }

    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for property in properties.values_mut() {
            normalize_schema(property);
        }
    }

    if let Some(items) = object.get_mut("items") {
        // draft-07 allows both a single schema and a tuple of schemas.
        match items {
            Value::Array(entries) => {
                for entry in entries {
                    normalize_schema(entry);
                }
            }
            other => normalize_schema(other),
        }
    }

    if let Some(additional) = object.get_mut("additionalProperties") {
        normalize_schema(additional);
    }

    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(entries) = object.get_mut(combinator).and_then(Value::as_array_mut) {
            for entry in entries {
                normalize_schema(entry);
            }
        }
    }

    if let Some(negated) = object.get_mut("not") {
        normalize_schema(negated);
    }
}

fn rewrite_exclusive_bound(
    object: &mut serde_json::Map<String, Value>,
    exclusive_key: &str,
    bound_key: &str,
) {
    let Some(value) = object.get(exclusive_key) else {
        return;
    };
    if let Some(number) = value.as_f64() {
        let bound = value
            .as_i64()
            .map(Value::from)
            .unwrap_or_else(|| Value::from(number));
        object.insert(bound_key.to_string(), bound);
        object.insert(exclusive_key.to_string(), Value::Bool(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(mut schema: Value) -> Value {
        normalize_schema(&mut schema);
        schema
    }

    #[test]
    fn numeric_exclusive_minimum_becomes_flagged_minimum() {
        let schema = normalized(json!({"type": "integer", "exclusiveMinimum": 5}));
        assert_eq!(
            schema,
            json!({"type": "integer", "minimum": 5, "exclusiveMinimum": true})
        );
    }

    #[test]
    fn numeric_exclusive_maximum_becomes_flagged_maximum() {
        let schema = normalized(json!({"type": "number", "exclusiveMaximum": 2.5}));
        assert_eq!(
            schema,
            json!({"type": "number", "maximum": 2.5, "exclusiveMaximum": true})
        );
    }

    #[test]
    fn null_required_is_dropped() {
        let schema = normalized(json!({"type": "object", "required": null}));
        assert_eq!(schema, json!({"type": "object"}));
    }

    #[test]
    fn string_required_is_dropped() {
        let schema = normalized(json!({"type": "object", "required": "name"}));
        assert_eq!(schema, json!({"type": "object"}));
    }

    #[test]
    fn array_required_is_preserved() {
        let schema = normalized(json!({"type": "object", "required": ["name"]}));
        assert_eq!(schema, json!({"type": "object", "required": ["name"]}));
    }

    #[test]
    fn recursion_covers_nested_schema_positions() {
        let schema = normalized(json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "exclusiveMinimum": 0},
                "tags": {"type": "array", "items": {"type": "integer", "exclusiveMaximum": 10}},
            },
            "additionalProperties": {"required": null},
            "anyOf": [{"exclusiveMinimum": 1}],
            "not": {"exclusiveMaximum": 3},
        }));
        assert_eq!(
            schema["properties"]["count"],
            json!({"type": "integer", "minimum": 0, "exclusiveMinimum": true})
        );
        assert_eq!(
            schema["properties"]["tags"]["items"],
            json!({"type": "integer", "maximum": 10, "exclusiveMaximum": true})
        );
        assert_eq!(schema["additionalProperties"], json!({}));
        assert_eq!(
            schema["anyOf"][0],
            json!({"minimum": 1, "exclusiveMinimum": true})
        );
        assert_eq!(
            schema["not"],
            json!({"maximum": 3, "exclusiveMaximum": true})
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalized(json!({
            "type": "object",
            "required": null,
            "properties": {"n": {"exclusiveMinimum": 5}},
        }));
        let twice = normalized(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn boolean_exclusive_flags_are_left_alone() {
        let schema = normalized(json!({"minimum": 5, "exclusiveMinimum": true}));
        assert_eq!(schema, json!({"minimum": 5, "exclusiveMinimum": true}));
    }
}
