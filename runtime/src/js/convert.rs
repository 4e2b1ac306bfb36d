//! Value marshalling between the QuickJS boundary and capability values.
//!
//! The JS bindings exchange structured data as JSON text; binary cells
//! are wrapped as `{"$blob": "<hex>"}` and revived into `ArrayBuffer`s
//! by the prelude on the script side.

use hull_primitives::{CapError, Column, Value};

/// Parse a JSON parameter array into capability values.
///
/// JSON integers become `Int`, other numbers `Double`; `{"$blob": hex}`
/// becomes `Blob`. Nested arrays/objects are not valid parameters.
pub fn params_from_json(text: &str) -> Result<Vec<Value>, CapError> {
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| CapError::invalid(format!("bad parameter array: {e}")))?;
    let serde_json::Value::Array(items) = parsed else {
        return Err(CapError::invalid("parameters must be an array"));
    };
    items.iter().map(json_to_value).collect()
}

/// One JSON value into one capability value.
pub fn json_to_value(v: &serde_json::Value) -> Result<Value, CapError> {
    match v {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                Ok(Value::Double(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(hex_str)) = map.get("$blob") {
                let bytes = hex::decode(hex_str)
                    .map_err(|_| CapError::invalid("bad $blob hex"))?;
                return Ok(Value::Blob(bytes));
            }
            Err(CapError::invalid(
                "unsupported parameter type object (serialize to JSON first)",
            ))
        }
        serde_json::Value::Array(_) => Err(CapError::invalid(
            "unsupported parameter type array (serialize to JSON first)",
        )),
    }
}

/// One capability value into its JSON transport form.
pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Double(d) => {
            serde_json::Number::from_f64(*d).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
        }
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => {
            let mut map = serde_json::Map::new();
            map.insert("$blob".into(), serde_json::Value::String(hex::encode(b)));
            serde_json::Value::Object(map)
        }
    }
}

/// One result row into its JSON transport object.
pub fn row_to_json(cols: &[Column<'_>]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for col in cols {
        map.insert(col.name.to_string(), value_to_json(&col.value));
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_roundtrip() {
        let params = params_from_json(r#"[null, 7, 2.5, "x", true]"#).unwrap();
        assert_eq!(
            params,
            vec![
                Value::Nil,
                Value::Int(7),
                Value::Double(2.5),
                Value::Text("x".into()),
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn test_blob_wrapper() {
        let params = params_from_json(r#"[{"$blob": "00ff10"}]"#).unwrap();
        assert_eq!(params, vec![Value::Blob(vec![0x00, 0xff, 0x10])]);

        let back = value_to_json(&Value::Blob(vec![0x00, 0xff, 0x10]));
        assert_eq!(back, serde_json::json!({"$blob": "00ff10"}));
    }

    #[test]
    fn test_nested_rejected() {
        assert!(params_from_json(r#"[[1,2]]"#).is_err());
        assert!(params_from_json(r#"[{"a": 1}]"#).is_err());
        assert!(params_from_json(r#"{"not": "array"}"#).is_err());
    }

    #[test]
    fn test_integer_valued_float_is_int() {
        // JSON.stringify(1.0) emits "1"; that arrives as an integer.
        let params = params_from_json("[1]").unwrap();
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_row_to_json() {
        let names = ["id".to_string(), "name".to_string()];
        let cols = vec![
            Column::new(&names[0], Value::Int(1)),
            Column::new(&names[1], Value::Text("alice".into())),
        ];
        assert_eq!(
            row_to_json(&cols),
            serde_json::json!({"id": 1, "name": "alice"})
        );
    }
}
