//! Value conversions applied while mapping fields between the two systems.
//!
//! A [`Transform`] is a named, pure function from one JSON value to another.
//! A [`FieldType`] is the declared type of a mapped field; values are coerced
//! to it after the transform runs so both sides compare like with like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// A value could not be converted by a transform or coerced to a field type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} cannot convert {value}")]
pub struct TransformError {
    pub operation: String,
    pub value: String,
}

impl TransformError {
    fn new(operation: impl fmt::Display, value: &Value) -> Self {
        Self {
            operation: operation.to_string(),
            value: value.to_string(),
        }
    }
}

/// Named value transforms available to field mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    CentsToDecimal,
    DecimalToCents,
    Trim,
    Lowercase,
    Uppercase,
    ToString,
    ToNumber,
}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::CentsToDecimal => "cents_to_decimal",
            Transform::DecimalToCents => "decimal_to_cents",
            Transform::Trim => "trim",
            Transform::Lowercase => "lowercase",
            Transform::Uppercase => "uppercase",
            Transform::ToString => "to_string",
            Transform::ToNumber => "to_number",
        }
    }

    /// Applies the transform to a remote value, producing the local value.
    pub fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        match self {
            Transform::CentsToDecimal => {
                let cents = as_f64(value).ok_or_else(|| TransformError::new(self, value))?;
                number_value(cents / 100.0).ok_or_else(|| TransformError::new(self, value))
            }
            Transform::DecimalToCents => {
                let amount = as_f64(value).ok_or_else(|| TransformError::new(self, value))?;
                Ok(Value::from((amount * 100.0).round() as i64))
            }
            Transform::Trim => value
                .as_str()
                .map(|s| Value::from(s.trim()))
                .ok_or_else(|| TransformError::new(self, value)),
            Transform::Lowercase => value
                .as_str()
                .map(|s| Value::from(s.to_lowercase()))
                .ok_or_else(|| TransformError::new(self, value)),
            Transform::Uppercase => value
                .as_str()
                .map(|s| Value::from(s.to_uppercase()))
                .ok_or_else(|| TransformError::new(self, value)),
            Transform::ToString => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::from(n.to_string())),
                Value::Bool(b) => Ok(Value::from(b.to_string())),
                _ => Err(TransformError::new(self, value)),
            },
            Transform::ToNumber => as_f64(value)
                .and_then(number_value)
                .ok_or_else(|| TransformError::new(self, value)),
        }
    }

    /// The transform that undoes this one, used when pushing local values
    /// back to the remote side. `None` means the value passes through as is.
    pub fn inverse(&self) -> Option<Transform> {
        match self {
            Transform::CentsToDecimal => Some(Transform::DecimalToCents),
            Transform::DecimalToCents => Some(Transform::CentsToDecimal),
            Transform::ToString => Some(Transform::ToNumber),
            Transform::ToNumber => Some(Transform::ToString),
            Transform::Trim | Transform::Lowercase | Transform::Uppercase => None,
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cents_to_decimal" => Ok(Transform::CentsToDecimal),
            "decimal_to_cents" => Ok(Transform::DecimalToCents),
            "trim" => Ok(Transform::Trim),
            "lowercase" => Ok(Transform::Lowercase),
            "uppercase" => Ok(Transform::Uppercase),
            "to_string" => Ok(Transform::ToString),
            "to_number" => Ok(Transform::ToNumber),
            _ => Err(format!("Unknown transform '{}'", s)),
        }
    }
}

/// Declared type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    Datetime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
        }
    }

    /// Coerces a value to this type. Datetimes are normalized to RFC 3339 UTC.
    pub fn coerce(&self, value: &Value) -> Result<Value, TransformError> {
        let coerced = match (self, value) {
            (FieldType::String, Value::String(_)) => Some(value.clone()),
            (FieldType::String, Value::Number(n)) => Some(Value::from(n.to_string())),
            (FieldType::String, Value::Bool(b)) => Some(Value::from(b.to_string())),
            (FieldType::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::from),
            (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (FieldType::Decimal, _) => as_f64(value).and_then(number_value),
            (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (FieldType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (FieldType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            (FieldType::Datetime, Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| Value::from(dt.with_timezone(&Utc).to_rfc3339())),
            _ => None,
        };
        coerced.ok_or_else(|| TransformError::new(self.as_str(), value))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compares two mapped values. Numbers compare numerically so that `10.5`
/// and `10.50` (or `10` and `10.0`) are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < 1e-9,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn number_value(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number)
    }
}
