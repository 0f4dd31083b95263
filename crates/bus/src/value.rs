use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Property name to value.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Interface name to its properties.
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// A single property value.
///
/// Enumerations are carried as their fully-qualified string form and parsed by
/// the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    /// A boolean.
    Bool(bool),

    /// An unsigned integer.
    U64(u64),

    /// A string, including enumeration values.
    Str(String),
}

/// A property held a different type than the reader expected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("expected {expected} value, found {found}")]
pub struct ValueTypeError {
    /// The type the reader asked for.
    pub expected: &'static str,

    /// The value that was actually present.
    pub found: PropertyValue,
}

impl PropertyValue {
    /// Reads the value as a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a `Bool`.
    pub fn as_bool(&self) -> Result<bool, ValueTypeError> {
        match self {
            Self::Bool(value) => Ok(*value),
            other => Err(other.type_error("bool")),
        }
    }

    /// Reads the value as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a `U64`.
    pub fn as_u64(&self) -> Result<u64, ValueTypeError> {
        match self {
            Self::U64(value) => Ok(*value),
            other => Err(other.type_error("u64")),
        }
    }

    /// Reads the value as a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a `Str`.
    pub fn as_str(&self) -> Result<&str, ValueTypeError> {
        match self {
            Self::Str(value) => Ok(value),
            other => Err(other.type_error("string")),
        }
    }

    fn type_error(&self, expected: &'static str) -> ValueTypeError {
        ValueTypeError {
            expected,
            found: self.clone(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::U64(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        assert_eq!(PropertyValue::Bool(true).as_bool(), Ok(true));
        assert_eq!(PropertyValue::U64(7).as_u64(), Ok(7));
        assert_eq!(PropertyValue::from("abc").as_str(), Ok("abc"));
    }

    #[test]
    fn test_type_mismatch_reports_found_value() {
        let err = PropertyValue::U64(1).as_bool().unwrap_err();

        assert_eq!(err.expected, "bool");
        assert_eq!(err.found, PropertyValue::U64(1));
        assert_eq!(err.to_string(), "expected bool value, found 1");
    }
}
