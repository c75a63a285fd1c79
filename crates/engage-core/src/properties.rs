//! Loosely typed property values and the wire sanitize pass.
//!
//! Hosts hand the SDK arbitrary attribute maps. Everything that reaches the
//! activity-ingest endpoint goes through [`sanitize`], which fixes the wire
//! shape existing backends depend on:
//! - date/time values become epoch milliseconds as a JSON double
//! - nested maps and lists are sanitized recursively
//! - entries whose value is null are dropped
//! - non-string keys are dropped (see [`PropertyValue::map_from_pairs`])

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// String-keyed property map. Key order is irrelevant on the wire.
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    List(Vec<PropertyValue>),
    Map(Properties),
}

impl PropertyValue {
    /// Build a map from loosely typed pairs. Pairs whose key is not a string
    /// are dropped; a repeated key keeps its last value.
    pub fn map_from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (PropertyValue, PropertyValue)>,
    {
        Self::Map(properties_from_pairs(pairs))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// See [`PropertyValue::map_from_pairs`].
pub fn properties_from_pairs<I>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (PropertyValue, PropertyValue)>,
{
    pairs
        .into_iter()
        .filter_map(|(key, value)| match key {
            PropertyValue::String(key) => Some((key, value)),
            _ => None,
        })
        .collect()
}

/// Sanitize a property map into its wire JSON object.
pub fn sanitize(props: &Properties) -> Map<String, Value> {
    props
        .iter()
        .filter_map(|(key, value)| sanitize_value(value).map(|v| (key.clone(), v)))
        .collect()
}

/// Sanitize a single value. `None` means the value has no wire form and the
/// enclosing entry must be dropped.
pub fn sanitize_value(value: &PropertyValue) -> Option<Value> {
    match value {
        PropertyValue::Null => None,
        PropertyValue::Bool(b) => Some(Value::Bool(*b)),
        PropertyValue::Int(i) => Some(Value::from(*i)),
        // NaN and infinities have no JSON form
        PropertyValue::Float(f) => Number::from_f64(*f).map(Value::Number),
        PropertyValue::String(s) => Some(Value::String(s.clone())),
        PropertyValue::DateTime(dt) => epoch_millis(dt),
        PropertyValue::List(items) => Some(Value::Array(
            items.iter().filter_map(sanitize_value).collect(),
        )),
        PropertyValue::Map(map) => Some(Value::Object(sanitize(map))),
    }
}

fn epoch_millis(dt: &DateTime<Utc>) -> Option<Value> {
    Number::from_f64(dt.timestamp_millis() as f64).map(Value::Number)
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match sanitize_value(self) {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(v: Vec<PropertyValue>) -> Self {
        Self::List(v)
    }
}

impl From<Properties> for PropertyValue {
    fn from(v: Properties) -> Self {
        Self::Map(v)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Build a [`Properties`] map: `properties! { "plan" => "pro", "seats" => 3 }`.
#[macro_export]
macro_rules! properties {
    () => {
        $crate::properties::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::properties::Properties::new();
        $(
            map.insert(
                ::std::string::String::from($key),
                $crate::properties::PropertyValue::from($value),
            );
        )+
        map
    }};
}
