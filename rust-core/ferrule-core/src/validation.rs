//! # Validation Module
//!
//! Rule-based validation of request input and structured errors for API
//! responses.
//!
//! Rules are pipe-separated strings in the familiar `required|email|max:255`
//! form. Each field reports at most one error: the first rule that fails.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern is valid")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?[1-9]\d{1,14}$|^[\d-]{7,15}$").expect("phone pattern is valid")
});

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Value is invalid type
    InvalidType,
    /// Value is too short
    TooShort,
    /// Value is too long
    TooLong,
    /// Value doesn't match pattern
    InvalidFormat,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// Field name (e.g., "email")
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a "required field" error
    pub fn required(field: impl Into<String>) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} is required"),
            field: field_str,
            code: ValidationCode::Required,
        }
    }

    /// Create an "invalid type" error with the given tail, e.g. "must be a string"
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be {expected}"),
            field: field_str,
            code: ValidationCode::InvalidType,
        }
    }

    fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(field, format!("{field} must be {expected}"), ValidationCode::InvalidFormat)
    }
}

/// Collection of validation errors
///
/// Allows aggregating multiple field errors for a single request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether `field` already has an error
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Field name to message map, in rule order
    #[must_use]
    pub fn by_field(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for error in &self.errors {
            map.entry(error.field.clone())
                .or_insert_with(|| Value::String(error.message.clone()));
        }
        map
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, ValidationErrors>;

/// Validate `data` against `(field, rules)` pairs
///
/// Rules other than `required` are skipped for absent or null fields.
///
/// # Errors
///
/// Returns every field that failed, one error per field.
pub fn validate(data: &Map<String, Value>, rules: &[(&str, &str)]) -> ValidationResult<()> {
    let mut errors = ValidationErrors::new();

    for (field, field_rules) in rules {
        let value = data.get(*field).filter(|v| !v.is_null());

        for rule in field_rules.split('|').map(str::trim).filter(|r| !r.is_empty()) {
            if errors.has(field) {
                break;
            }
            let (name, arg) = rule.split_once(':').map_or((rule, None), |(n, a)| (n, Some(a)));

            if name == "required" {
                if value.map_or(true, is_empty_value) {
                    errors.add(FieldError::required(*field));
                }
                continue;
            }

            if let Some(value) = value {
                if let Some(error) = check_rule(field, name, arg, value) {
                    errors.add(error);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn check_rule(field: &str, name: &str, arg: Option<&str>, value: &Value) -> Option<FieldError> {
    let text = value.as_str();
    let ok = match name {
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "bool" | "boolean" => {
            value.is_boolean()
                || matches!(text, Some("0" | "1"))
                || matches!(value.as_i64(), Some(0 | 1))
        }
        "int" | "integer" => value.is_i64() || value.is_u64() || text.is_some_and(|s| s.parse::<i64>().is_ok()),
        "float" | "double" | "numeric" => value.is_number() || text.is_some_and(|s| s.trim().parse::<f64>().is_ok()),
        "email" => text.is_some_and(|s| EMAIL.is_match(s)),
        "phone" => text.is_some_and(|s| PHONE.is_match(s)),
        "date" => text.is_some_and(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok_and(|d| d.format("%Y-%m-%d").to_string() == s)
        }),
        "min" | "max" => return check_length(field, name, arg, value),
        _ => true,
    };
    if ok {
        return None;
    }

    Some(match name {
        "string" => FieldError::invalid_type(field, "a string"),
        "array" => FieldError::invalid_type(field, "an array"),
        "object" => FieldError::invalid_type(field, "an object"),
        "bool" | "boolean" => FieldError::invalid_type(field, "true or false"),
        "int" | "integer" => FieldError::invalid_type(field, "an integer"),
        "float" | "double" => FieldError::invalid_type(field, "a floating number"),
        "numeric" => FieldError::invalid_type(field, "numeric"),
        "email" => FieldError::invalid_format(field, "a valid email address"),
        "phone" => FieldError::invalid_format(field, "a valid phone number"),
        _ => FieldError::invalid_format(field, "a valid date (YYYY-MM-DD)"),
    })
}

fn check_length(field: &str, name: &str, arg: Option<&str>, value: &Value) -> Option<FieldError> {
    let bound: usize = arg.and_then(|a| a.trim().parse().ok())?;
    let (len, unit) = match value {
        Value::String(s) => (s.chars().count(), "characters"),
        Value::Array(a) => (a.len(), "items"),
        _ => return None,
    };

    if name == "min" && len < bound {
        let message = if unit == "items" {
            format!("{field} must have at least {bound} items")
        } else {
            format!("{field} must be at least {bound} characters")
        };
        return Some(FieldError::new(field, message, ValidationCode::TooShort));
    }
    if name == "max" && len > bound {
        return Some(FieldError::new(
            field,
            format!("{field} must not exceed {bound} {unit}"),
            ValidationCode::TooLong,
        ));
    }
    None
}
