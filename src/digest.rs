use serde_json::{Map, Value};

use crate::error::{Result, SourceError};

/// Nesting bound for the digest serializer. Owned JSON trees cannot be
/// cyclic, so runaway depth is the only unresolvable shape left.
const MAX_DEPTH: usize = 128;

/// MD5 over the stable serialization of `item`, lowercase hex.
pub fn content_digest(item: &Map<String, Value>) -> Result<String> {
    let stable = stable_json(item)?;
    Ok(format!("{:x}", md5::compute(stable.as_bytes())))
}

/// Stable serialization: object keys sorted, arrays in order, scalars as
/// compact JSON. Only ever used as digest input.
pub fn stable_json(item: &Map<String, Value>) -> Result<String> {
    let mut out = String::new();
    write_object(item, &mut out, 0)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String, depth: usize) -> Result<()> {
    match value {
        Value::Object(map) => write_object(map, out, depth),
        Value::Array(items) => {
            check_depth(depth)?;
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out, depth + 1)?;
            }
            out.push(']');
            Ok(())
        }
        Value::String(s) => write_str(s, out),
        Value::Number(n) => {
            out.push_str(&n.to_string());
            Ok(())
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            Ok(())
        }
        Value::Null => {
            out.push_str("null");
            Ok(())
        }
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String, depth: usize) -> Result<()> {
    check_depth(depth)?;
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_str(key, out)?;
        out.push(':');
        write_value(&map[key.as_str()], out, depth + 1)?;
    }
    out.push('}');
    Ok(())
}

fn write_str(s: &str, out: &mut String) -> Result<()> {
    let escaped = serde_json::to_string(s).map_err(|e| SourceError::Hashing(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}

fn check_depth(depth: usize) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Err(SourceError::Hashing(format!(
            "structure nested deeper than {} levels",
            MAX_DEPTH
        )));
    }
    Ok(())
}
