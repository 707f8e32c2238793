//! The tagged value tree every document, literal and binding is normalized into.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{DocError, Result};

/// Field name to value map with insertion order preserved.
pub type Document = IndexMap<String, Value>;

/// A JSON-shaped value.
///
/// Integers that fit in `i64` are `Int`. Larger integers up to `u64::MAX` are
/// `UInt`, so a `UInt` is always above `i64::MAX`. Every other number is `Float`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Document),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// Field lookup on an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|doc| doc.get(key))
    }

    /// SQL-style truthiness: null, false, zero and the empty string are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(_) => true,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Equality that treats `1` and `1.0` as the same value.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::UInt(a), Value::Float(b)) | (Value::Float(b), Value::UInt(a)) => *a as f64 == *b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.loosely_equals(other)))
            }
            _ => self == other,
        }
    }

    /// Ordering of two comparable values, `None` when the types do not compare.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(_), Value::UInt(_)) => Some(Ordering::Less),
            (Value::UInt(_), Value::Int(_)) => Some(Ordering::Greater),
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total ordering used for sorting: nulls first, then numbers, strings,
    /// booleans, arrays and objects.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::UInt(_) | Value::Float(_) => 1,
                Value::String(_) => 2,
                Value::Bool(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            }
        }

        self.partial_compare(other)
            .unwrap_or_else(|| match rank(self).cmp(&rank(other)) {
                Ordering::Equal => self.to_string().cmp(&other.to_string()),
                ord => ord,
            })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            other => write!(f, "{}", serde_json::Value::from(other.clone())),
        }
    }
}

// Conversions

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::UInt(u) => serde_json::Value::from(u),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(doc) => {
                serde_json::Value::Object(doc.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Value::Int(i as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        i64::try_from(i).map(Value::Int).unwrap_or(Value::UInt(i))
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f as f64)
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

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc)
    }
}

// Normalization of caller-supplied shapes

/// Wraps any serializable record so it can be used as a document or a
/// binding bag.
///
/// # Example
/// ```rust
/// use monodoc_common::value::{IntoDocument, Record, Value};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Book {
///     title: String,
///     pages: u32,
/// }
///
/// let doc = Record(Book { title: "Book 1".into(), pages: 20 }).into_document().unwrap();
/// assert_eq!(doc["pages"], Value::from(20));
/// ```
#[derive(Debug, Clone)]
pub struct Record<T>(pub T);

/// Total conversion from a supported input shape into a `Document`.
pub trait IntoDocument {
    fn into_document(self) -> Result<Document>;
}

fn object_or_err(value: Value, what: &str) -> Result<Document> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(DocError::Bind(format!(
            "{what} must be a JSON object, got {}",
            other.type_name()
        ))),
    }
}

impl IntoDocument for Document {
    fn into_document(self) -> Result<Document> {
        Ok(self)
    }
}

impl IntoDocument for Value {
    fn into_document(self) -> Result<Document> {
        object_or_err(self, "Document")
    }
}

impl IntoDocument for serde_json::Value {
    fn into_document(self) -> Result<Document> {
        object_or_err(Value::from(self), "Document")
    }
}

impl IntoDocument for &str {
    fn into_document(self) -> Result<Document> {
        let json: serde_json::Value = serde_json::from_str(self)?;
        json.into_document()
    }
}

impl IntoDocument for String {
    fn into_document(self) -> Result<Document> {
        self.as_str().into_document()
    }
}

impl<V: Into<Value>> IntoDocument for HashMap<String, V> {
    fn into_document(self) -> Result<Document> {
        let mut entries: Vec<_> = self.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> IntoDocument for BTreeMap<String, V> {
    fn into_document(self) -> Result<Document> {
        Ok(self.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Serialize> IntoDocument for Record<T> {
    fn into_document(self) -> Result<Document> {
        let json = serde_json::to_value(&self.0)?;
        object_or_err(Value::from(json), "Record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_numbers_keep_integral_form() {
        let v: Value = serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": [true, null]}"#).unwrap();
        let doc = v.as_object().unwrap();
        assert_eq!(doc["a"], Value::Int(1));
        assert_eq!(doc["b"], Value::Float(1.5));
        assert_eq!(
            doc["c"],
            Value::Array(vec![Value::Bool(true), Value::Null])
        );
    }

    #[test]
    fn integers_above_i64_stay_exact() {
        let v: Value = serde_json::from_str(r#"{"id": 18446744073709551615}"#).unwrap();
        assert_eq!(v.get("id"), Some(&Value::UInt(u64::MAX)));
        assert_eq!(v.to_string(), r#"{"id":18446744073709551615}"#);

        assert_eq!(Value::from(u64::MAX), Value::UInt(u64::MAX));
        assert_eq!(Value::from(7u64), Value::Int(7));
        assert_eq!(
            Value::Int(i64::MAX).partial_compare(&Value::UInt(u64::MAX)),
            Some(Ordering::Less)
        );
        assert!(!Value::UInt(u64::MAX).loosely_equals(&Value::Int(-1)));
    }

    #[test]
    fn object_key_order_is_preserved() {
        let doc = r#"{"z": 1, "a": 2, "m": 3}"#.into_document().unwrap();
        let keys: Vec<_> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn every_input_shape_normalizes_to_the_same_tree() {
        #[derive(Serialize)]
        struct Book {
            title: &'static str,
            pages: i32,
        }

        let from_text = r#"{"title": "Book 1", "pages": 20}"#.into_document().unwrap();
        let from_json = serde_json::json!({"title": "Book 1", "pages": 20})
            .into_document()
            .unwrap();
        let from_record = Record(Book {
            title: "Book 1",
            pages: 20,
        })
        .into_document()
        .unwrap();
        let mut map = BTreeMap::new();
        map.insert("pages".to_string(), Value::from(20));
        map.insert("title".to_string(), Value::from("Book 1"));
        let from_map = map.into_document().unwrap();

        assert_eq!(from_text, from_json);
        assert_eq!(from_text, from_record);
        assert_eq!(from_map.get("pages"), from_text.get("pages"));
        assert_eq!(from_map.get("title"), from_text.get("title"));
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let err = "[1, 2]".into_document().unwrap_err();
        assert_eq!(err.kind(), "bind_error");
        assert!("not json".into_document().is_err());
    }

    #[test]
    fn numeric_comparison_crosses_int_and_float() {
        assert_eq!(
            Value::Int(2).partial_compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert!(Value::Int(3).loosely_equals(&Value::Float(3.0)));
        assert_eq!(Value::from("a").partial_compare(&Value::Int(1)), None);
    }

    #[test]
    fn sort_order_puts_nulls_first() {
        let mut values = vec![Value::from("b"), Value::Int(3), Value::Null, Value::Float(1.5)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![Value::Null, Value::Float(1.5), Value::Int(3), Value::from("b")]
        );
    }
}
