//! Validation and coercion of resolved kwargs.

use thiserror::Error;

use crate::error::DispatchError;
use crate::handlers::kwargs::{Kwargs, Value};
use crate::handlers::params::{Constraints, ParamSpec, ParamType};
use crate::http::Request;

/// One failed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key} ({location}): {message}")]
pub struct ParameterError {
    pub key: String,
    /// `path`, `query`, `header`, `cookie` or `body`.
    pub location: String,
    pub message: String,
}

impl ParameterError {
    pub fn new(key: impl Into<String>, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "key": self.key,
            "location": self.location,
            "message": self.message,
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{} parameter(s) failed validation", .errors.len())]
pub struct ValidationError {
    pub errors: Vec<ParameterError>,
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        DispatchError::Validation { errors: err.errors }
    }
}

/// Validates and coerces the full kwargs map once every value is materialized.
pub trait Signature: Send + Sync {
    fn parse(&self, request: &Request, kwargs: Kwargs) -> Result<Kwargs, ValidationError>;
}

/// Signature built from declared parameter specs.
///
/// Kwargs that are not declared params (data, body, dependencies) pass through.
#[derive(Debug, Clone, Default)]
pub struct DeclaredSignature {
    params: Vec<ParamSpec>,
}

impl DeclaredSignature {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }
}

impl Signature for DeclaredSignature {
    fn parse(&self, _request: &Request, mut kwargs: Kwargs) -> Result<Kwargs, ValidationError> {
        let mut errors = Vec::new();

        for spec in &self.params {
            let raw = kwargs.remove(&spec.name).filter(|v| !v.is_null());
            let Some(raw) = raw else {
                if let Some(default) = &spec.default {
                    kwargs.insert(spec.name.clone(), default.clone());
                } else if spec.required {
                    errors.push(error(spec, "field required"));
                }
                continue;
            };

            match coerce(spec, raw) {
                Ok(value) => match check_constraints(&spec.constraints, &value) {
                    Ok(()) => kwargs.insert(spec.name.clone(), value),
                    Err(message) => errors.push(error(spec, message)),
                },
                Err(message) => errors.push(error(spec, message)),
            }
        }

        if errors.is_empty() {
            Ok(kwargs)
        } else {
            Err(ValidationError { errors })
        }
    }
}

fn error(spec: &ParamSpec, message: impl Into<String>) -> ParameterError {
    ParameterError::new(&spec.name, spec.source.as_str(), message)
}

fn coerce(spec: &ParamSpec, raw: Value) -> Result<Value, String> {
    let text = match raw {
        Value::Text(text) => text,
        // already typed (e.g. a default or a provider override)
        other => return Ok(other),
    };
    match spec.ty {
        ParamType::Str => Ok(Value::Text(text)),
        ParamType::Int => text
            .trim()
            .parse::<i64>()
            .map(|n| Value::Json(n.into()))
            .map_err(|_| format!("value {text:?} is not a valid integer")),
        ParamType::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Value::Json(serde_json::Value::Number(n)))
            .ok_or_else(|| format!("value {text:?} is not a valid number")),
        ParamType::Bool => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Json(true.into())),
            "false" | "0" | "no" | "off" => Ok(Value::Json(false.into())),
            _ => Err(format!("value {text:?} is not a valid boolean")),
        },
        ParamType::Json => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|e| format!("invalid JSON: {e}")),
    }
}

fn check_constraints(constraints: &Constraints, value: &Value) -> Result<(), String> {
    let number = match value {
        Value::Json(v) => v.as_f64(),
        _ => None,
    };
    if let Some(n) = number {
        if let Some(bound) = constraints.gt.filter(|b| n <= *b) {
            return Err(format!("must be greater than {bound}"));
        }
        if let Some(bound) = constraints.ge.filter(|b| n < *b) {
            return Err(format!("must be greater than or equal to {bound}"));
        }
        if let Some(bound) = constraints.lt.filter(|b| n >= *b) {
            return Err(format!("must be less than {bound}"));
        }
        if let Some(bound) = constraints.le.filter(|b| n > *b) {
            return Err(format!("must be less than or equal to {bound}"));
        }
    }

    let length = match value {
        Value::Text(s) => Some(s.chars().count()),
        Value::Json(serde_json::Value::String(s)) => Some(s.chars().count()),
        Value::Json(serde_json::Value::Array(items)) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = constraints.min_length.filter(|m| len < *m) {
            return Err(format!("length must be at least {min}"));
        }
        if let Some(max) = constraints.max_length.filter(|m| len > *m) {
            return Err(format!("length must be at most {max}"));
        }
    }
    Ok(())
}
