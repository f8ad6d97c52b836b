use serde_json::{Map, Value};
use std::fmt::Write;

/// Return true if the given [`Value`] is truthy.
///
/// Null, `false`, zero, the empty string and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(bo) => *bo,
        Value::Number(nu) => nu.as_f64().is_some_and(|n| n != 0.0),
        Value::String(st) => !st.is_empty(),
        Value::Array(ar) => !ar.is_empty(),
        Value::Object(ob) => !ob.is_empty(),
        Value::Null => false,
    }
}

/// Return true if the given [`Value`] counts as empty output, meaning null or the
/// empty string.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(st) => st.is_empty(),
        _ => false,
    }
}

/// Convert the source of a loop to the ordered items it iterates.
///
/// Arrays yield their elements and objects yield their values in key order. Any other
/// value has no enumerable contents.
pub fn to_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(array) => array,
        Value::Object(object) => object.into_iter().map(|(_, value)| value).collect(),
        _ => vec![],
    }
}

/// Return the text that is written for the given [`Value`].
pub fn to_text(value: &Value) -> String {
    let mut buffer = String::new();
    write_value(&mut buffer, value);

    buffer
}

/// Write the given Value to the buffer.
///
/// Strings are written verbatim and null writes nothing.
pub fn write_value(buffer: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(string) => buffer.push_str(string),
        Value::Array(array) => write_array(buffer, array),
        Value::Object(object) => write_object(buffer, object),
        _ => {
            let _ = write!(buffer, "{value}");
        }
    }
}

/// Write a value nested in a collection, where null is spelled out.
fn write_nested(buffer: &mut String, value: &Value) {
    match value {
        Value::Null => buffer.push_str("null"),
        _ => write_value(buffer, value),
    }
}

/// Write the value to the buffer as a comma separated list and surrounded by braces.
fn write_array(buffer: &mut String, value: &[Value]) {
    buffer.push('[');
    for (index, item) in value.iter().enumerate() {
        if index > 0 {
            buffer.push_str(", ");
        }
        write_nested(buffer, item);
    }
    buffer.push(']');
}

/// Write the value to the buffer as key/value pairs and surrounded by curly braces.
fn write_object(buffer: &mut String, value: &Map<String, Value>) {
    buffer.push('{');
    for (index, (key, item)) in value.iter().enumerate() {
        if index > 0 {
            buffer.push_str(", ");
        }
        buffer.push_str(key);
        buffer.push_str(": ");
        write_nested(buffer, item);
    }
    buffer.push('}');
}
