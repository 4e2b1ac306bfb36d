//! Value marshalling between Lua and the capability boundary.

use hull_primitives::{CapError, Column, Value};

/// Convert one Lua value into a capability `Value`.
///
/// Integer-typed numbers stay integers; fractional numbers become
/// doubles. Lua strings are byte strings: valid UTF-8 becomes `Text`,
/// anything else becomes `Blob`. Tables, functions, and userdata are
/// not valid parameters.
pub fn lua_to_value(v: &mlua::Value) -> Result<Value, CapError> {
    match v {
        mlua::Value::Nil => Ok(Value::Nil),
        mlua::Value::Boolean(b) => Ok(Value::Bool(*b)),
        mlua::Value::Integer(i) => Ok(Value::Int(*i)),
        mlua::Value::Number(n) => Ok(Value::Double(*n)),
        mlua::Value::String(s) => {
            let bytes = s.as_bytes();
            match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Value::Text(text.to_string())),
                Err(_) => Ok(Value::Blob(bytes.to_vec())),
            }
        }
        other => Err(CapError::invalid(format!(
            "unsupported parameter type {:?} (serialize tables to JSON first)",
            other.type_name()
        ))),
    }
}

/// Convert a capability `Value` back into a Lua value.
///
/// Both `Text` and `Blob` become Lua strings — Lua strings carry
/// arbitrary bytes, so the original length is preserved either way.
pub fn value_to_lua<'lua>(lua: &'lua mlua::Lua, v: &Value) -> mlua::Result<mlua::Value<'lua>> {
    Ok(match v {
        Value::Nil => mlua::Value::Nil,
        Value::Int(i) => mlua::Value::Integer(*i),
        Value::Double(d) => mlua::Value::Number(*d),
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Text(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Blob(b) => mlua::Value::String(lua.create_string(b)?),
    })
}

/// Build a Lua table for one result row.
pub fn row_to_table<'lua>(
    lua: &'lua mlua::Lua,
    cols: &[Column<'_>],
) -> mlua::Result<mlua::Table<'lua>> {
    let row = lua.create_table()?;
    for col in cols {
        row.set(col.name, value_to_lua(lua, &col.value)?)?;
    }
    Ok(row)
}

/// Collect a Lua parameter array (sequence) into capability values.
pub fn lua_params(params: &Option<mlua::Table>) -> Result<Vec<Value>, mlua::Error> {
    let Some(table) = params else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for item in table.clone().sequence_values::<mlua::Value>() {
        let item = item?;
        out.push(lua_to_value(&item).map_err(mlua::Error::external)?);
    }
    Ok(out)
}

/// Middleware short-circuit rule: a non-zero integer return terminates
/// the chain. Booleans are accepted as a convenience; everything else
/// (including no return value) continues.
pub fn is_short_circuit(v: &mlua::Value) -> bool {
    match v {
        mlua::Value::Integer(i) => *i != 0,
        mlua::Value::Number(n) => *n != 0.0,
        mlua::Value::Boolean(b) => *b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_marshalling() {
        let lua = mlua::Lua::new();
        assert_eq!(lua_to_value(&mlua::Value::Nil).unwrap(), Value::Nil);
        assert_eq!(
            lua_to_value(&mlua::Value::Integer(7)).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            lua_to_value(&mlua::Value::Number(2.5)).unwrap(),
            Value::Double(2.5)
        );
        assert_eq!(
            lua_to_value(&mlua::Value::Boolean(true)).unwrap(),
            Value::Bool(true)
        );
        let s = lua.create_string("hello").unwrap();
        assert_eq!(
            lua_to_value(&mlua::Value::String(s)).unwrap(),
            Value::Text("hello".into())
        );
    }

    #[test]
    fn test_non_utf8_string_is_blob() {
        let lua = mlua::Lua::new();
        let s = lua.create_string(&[0xff, 0xfe, 0x01]).unwrap();
        assert_eq!(
            lua_to_value(&mlua::Value::String(s)).unwrap(),
            Value::Blob(vec![0xff, 0xfe, 0x01])
        );
    }

    #[test]
    fn test_table_rejected() {
        let lua = mlua::Lua::new();
        let t = lua.create_table().unwrap();
        let err = lua_to_value(&mlua::Value::Table(t)).unwrap_err();
        assert!(matches!(err, CapError::InvalidArgument(_)));
    }

    #[test]
    fn test_value_roundtrip() {
        let lua = mlua::Lua::new();
        for v in [
            Value::Nil,
            Value::Int(-3),
            Value::Double(0.25),
            Value::Bool(false),
            Value::Text("chunk".into()),
            Value::Blob(vec![0, 255, 7]),
        ] {
            let lv = value_to_lua(&lua, &v).unwrap();
            let back = lua_to_value(&lv).unwrap();
            match v {
                // Blobs come back as Lua strings; non-UTF-8 stays Blob.
                Value::Blob(ref b) => assert_eq!(back, Value::Blob(b.clone())),
                ref other => assert_eq!(&back, other),
            }
        }
    }

    #[test]
    fn test_short_circuit_rule() {
        assert!(is_short_circuit(&mlua::Value::Integer(1)));
        assert!(is_short_circuit(&mlua::Value::Boolean(true)));
        assert!(!is_short_circuit(&mlua::Value::Integer(0)));
        assert!(!is_short_circuit(&mlua::Value::Nil));
    }
}
