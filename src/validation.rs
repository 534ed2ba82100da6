//! Reading validation.
//!
//! Turns an untyped JSON field bag (a REST body, or an MQTT payload merged
//! with the topic-derived device id) into a typed [`Reading`]. Every rule is
//! evaluated and failures accumulate in rule order, so a client sees all of
//! its mistakes in one response.
//!
//! No implicit coercion: `"23.5"` is not a number.

use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::clock::Clock;
use crate::models::Reading;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length of a device identifier, in bytes.
pub const MAX_DEVICE_ID_LENGTH: usize = 255;

/// Default lower bound for readings (absolute zero, in °C).
pub const DEFAULT_VALUE_MIN: f64 = -273.15;

/// Default upper bound for readings.
pub const DEFAULT_VALUE_MAX: f64 = 1000.0;

pub const FIELD_DEVICE_ID: &str = "device_id";
pub const FIELD_VALUE: &str = "value";
pub const FIELD_TIMESTAMP: &str = "timestamp";

// =============================================================================
// Errors
// =============================================================================

/// A single rule violation, keyed by field name.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: &'static str, max: usize },
}

impl FieldError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            FieldError::MissingField(field) => field,
            FieldError::InvalidType { field, .. }
            | FieldError::OutOfRange { field, .. }
            | FieldError::TooLong { field, .. } => field,
        }
    }
}

/// All rule violations found in one input. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    errors: Vec<FieldError>,
}

impl ValidationError {
    pub(crate) fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether any violation concerns `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field() == field)
    }

    /// Human-readable message per violation.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for ValidationError {}

// =============================================================================
// Value range policy
// =============================================================================

/// Inclusive plausibility range for reading values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueBounds {
    pub min: f64,
    pub max: f64,
}

impl ValueBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for ValueBounds {
    fn default() -> Self {
        Self::new(DEFAULT_VALUE_MIN, DEFAULT_VALUE_MAX)
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Validates raw field bags into [`Reading`]s.
///
/// Cheap to clone; the clock is shared.
#[derive(Clone)]
pub struct ReadingValidator {
    bounds: Option<ValueBounds>,
    clock: Arc<dyn Clock>,
}

impl ReadingValidator {
    /// Create a validator. `bounds = None` disables the range policy.
    pub fn new(bounds: Option<ValueBounds>, clock: Arc<dyn Clock>) -> Self {
        Self { bounds, clock }
    }

    /// Validate a raw input.
    ///
    /// Anything other than a JSON object is treated as an empty field bag.
    pub fn validate(&self, raw: &Value) -> Result<Reading, ValidationError> {
        let empty = Map::new();
        let fields = raw.as_object().unwrap_or(&empty);

        let mut errors = Vec::new();

        let device_id = validate_device_id(fields.get(FIELD_DEVICE_ID))
            .map_err(|e| errors.push(e))
            .ok();

        let value = self
            .validate_value(fields.get(FIELD_VALUE))
            .map_err(|e| errors.push(e))
            .ok();

        let timestamp = match fields.get(FIELD_TIMESTAMP) {
            None | Some(Value::Null) => Some(self.clock.now_millis()),
            Some(raw) => parse_timestamp(raw).map_err(|e| errors.push(e)).ok(),
        };

        match (device_id, value, timestamp) {
            (Some(device_id), Some(value), Some(timestamp)) => Ok(Reading {
                device_id,
                value,
                timestamp,
            }),
            _ => Err(ValidationError::new(errors)),
        }
    }

    fn validate_value(&self, raw: Option<&Value>) -> Result<f64, FieldError> {
        let value = raw
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or(FieldError::InvalidType {
                field: FIELD_VALUE,
                expected: "a finite number",
            })?;

        if let Some(bounds) = self.bounds
            && !bounds.contains(value)
        {
            return Err(FieldError::OutOfRange {
                field: FIELD_VALUE,
                min: bounds.min,
                max: bounds.max,
            });
        }

        Ok(value)
    }
}

fn validate_device_id(raw: Option<&Value>) -> Result<String, FieldError> {
    let device_id = match raw {
        None | Some(Value::Null) => return Err(FieldError::MissingField(FIELD_DEVICE_ID)),
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(FieldError::InvalidType {
                field: FIELD_DEVICE_ID,
                expected: "a string",
            });
        }
    };

    if device_id.trim().is_empty() {
        return Err(FieldError::MissingField(FIELD_DEVICE_ID));
    }

    if device_id.len() > MAX_DEVICE_ID_LENGTH {
        return Err(FieldError::TooLong {
            field: FIELD_DEVICE_ID,
            max: MAX_DEVICE_ID_LENGTH,
        });
    }

    Ok(device_id.clone())
}

const TIMESTAMP_EXPECTED: &str = "epoch milliseconds or an RFC 3339 string";

/// Parse a client-supplied timestamp into epoch milliseconds.
///
/// Accepts integral or fractional JSON numbers (fraction truncated), strings
/// of decimal digits, and RFC 3339 strings.
pub fn parse_timestamp(raw: &Value) -> Result<i64, FieldError> {
    let invalid = FieldError::InvalidType {
        field: FIELD_TIMESTAMP,
        expected: TIMESTAMP_EXPECTED,
    };

    match raw {
        Value::Number(n) => {
            if let Some(millis) = n.as_i64() {
                return Ok(millis);
            }
            match n.as_f64() {
                // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
                Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Ok(f.trunc() as i64)
                }
                _ => Err(invalid),
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(millis) = s.parse::<i64>() {
                return Ok(millis);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .map_err(|_| invalid)
        }
        _ => Err(invalid),
    }
}
