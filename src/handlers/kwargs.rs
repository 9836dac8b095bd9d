//! Resolved handler arguments.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::http::form::{FormData, UploadFile};

/// A single resolved argument.
#[derive(Clone)]
pub enum Value {
    Null,
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
    Form(FormData),
    Upload(Arc<UploadFile>),
    /// Arbitrary object produced by a dependency provider.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Json(serde_json::Value::Null))
    }

    /// JSON view of the value, if it has one.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Text(s) => Some(serde_json::Value::String(s.clone())),
            Value::Json(v) => Some(v.clone()),
            Value::Form(form) => Some(form.to_json()),
            Value::Bytes(_) | Value::Upload(_) | Value::Object(_) => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Value::Form(form) => f.debug_tuple("Form").field(&form.len()).finish(),
            Value::Upload(u) => f.debug_tuple("Upload").field(&u.filename()).finish(),
            Value::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<FormData> for Value {
    fn from(form: FormData) -> Self {
        Value::Form(form)
    }
}

/// Keyword arguments for one handler invocation, keyed by kwarg name.
#[derive(Debug, Clone, Default)]
pub struct Kwargs {
    values: BTreeMap<String, Value>,
}

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Text(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Json(v) => v.as_i64(),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Json(v) => v.as_f64(),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn json(&self, key: &str) -> Option<&serde_json::Value> {
        match self.get(key)? {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn bytes(&self, key: &str) -> Option<&Bytes> {
        match self.get(key)? {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn form(&self, key: &str) -> Option<&FormData> {
        match self.get(key)? {
            Value::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn upload(&self, key: &str) -> Option<&Arc<UploadFile>> {
        match self.get(key)? {
            Value::Upload(u) => Some(u),
            _ => None,
        }
    }

    /// A dependency object of type `T`.
    pub fn object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.get(key)? {
            Value::Object(obj) => obj.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}
