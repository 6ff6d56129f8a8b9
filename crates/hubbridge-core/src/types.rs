/*!
 * Core data types for hubbridge.
 *
 * Hub attribute values arrive loosely typed: the same attribute may be
 * reported as `"55"`, `55` or `55.0` depending on the driver. `Value` keeps
 * the original shape and offers lenient accessors on top of it.
 */
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A loosely typed value as reported by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Map of string keys to values
    Object(HashMap<String, Value>),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric (integer or float)
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if *f == (*f as i64) as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get an array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get an object value
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Interpret the value as a number, parsing numeric strings
    ///
    /// Returns `None` for NaN, infinities and anything that is not a number.
    pub fn to_number(&self) -> Option<f64> {
        let n = match self {
            Value::Integer(i) => *i as f64,
            Value::Float(f) => *f,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Interpret the value as text
    ///
    /// Numbers and booleans are rendered the way the hub would send them.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Compare against a string case-insensitively, ignoring surrounding whitespace
    pub fn text_eq(&self, expected: &str) -> bool {
        self.to_text()
            .map(|t| t.trim().eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) | Value::Object(_) => {
                let json = serde_json::Value::from(self.clone());
                write!(f, "{}", json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(o: HashMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Normalise a capability or command name for comparison
///
/// Hub drivers disagree on spelling (`Switch Level`, `SwitchLevel`,
/// `switchLevel`), so names are compared lowercased with whitespace removed.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_deserializes_loose_json() {
        let v: Value = serde_json::from_str("55").unwrap();
        assert_eq!(v, Value::Integer(55));

        let v: Value = serde_json::from_str("21.5").unwrap();
        assert_eq!(v, Value::Float(21.5));

        let v: Value = serde_json::from_str("\"on\"").unwrap();
        assert_eq!(v, Value::String("on".to_string()));

        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_to_number_parses_strings() {
        assert_eq!(Value::from("55").to_number(), Some(55.0));
        assert_eq!(Value::from(" 21.5 ").to_number(), Some(21.5));
        assert_eq!(Value::from(7).to_number(), Some(7.0));
        assert_eq!(Value::from("on").to_number(), None);
        assert_eq!(Value::from("NaN").to_number(), None);
        assert_eq!(Value::Null.to_number(), None);
    }

    #[test]
    fn test_text_eq_is_lenient() {
        assert!(Value::from("On").text_eq("on"));
        assert!(Value::from(" closed ").text_eq("closed"));
        assert!(!Value::from("open").text_eq("closed"));
        assert!(Value::from(true).text_eq("true"));
    }

    #[test]
    fn test_json_round_trip_shapes() {
        let json = serde_json::json!({"a": [1, "x", true], "b": 2.5});
        let value = Value::from(json.clone());
        assert_eq!(serde_json::Value::from(value), json);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Switch Level"), "switchlevel");
        assert_eq!(normalize_name("SwitchLevel"), "switchlevel");
        assert_eq!(normalize_name("Acceleration Sensor"), normalize_name("AccelerationSensor"));
    }
}
