//! Input validation.
//!
//! Every check here runs before the cache or the budget is touched.

use once_cell::sync::Lazy;
use quotaguard_core::{ValidationConfig, ValidationError};
use regex::Regex;
use serde::Serialize;

/// Matches any character outside the allowed key charset.
static ILLEGAL_KEY_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.:/@-]").expect("Invalid key charset regex"));

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validating non-empty strings.
pub trait ValidateNonEmpty {
    /// Returns `RequiredFieldMissing` if the value is empty or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> ValidationResult<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> ValidationResult<()> {
        if self.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: field_name.to_string(),
            });
        }
        Ok(())
    }
}

/// Trait for validating numeric ranges.
pub trait ValidateRange {
    /// Validate that the value is within an inclusive range.
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> ValidationResult<()>
    where
        Self: Sized;
}

impl ValidateRange for u32 {
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> ValidationResult<()> {
        if *self < min || *self > max {
            return Err(ValidationError::InvalidValue {
                field: field_name.to_string(),
                reason: format!("{} is outside {}..={}", self, min, max),
            });
        }
        Ok(())
    }
}

fn validate_length(value: &str, field: &str, max: usize) -> ValidationResult<()> {
    let length = value.chars().count();
    if length > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            length,
            max,
        });
    }
    Ok(())
}

fn validate_charset(value: &str, field: &str) -> ValidationResult<()> {
    match ILLEGAL_KEY_CHAR.find(value) {
        Some(found) => Err(ValidationError::IllegalCharacter {
            field: field.to_string(),
            character: found.as_str().chars().next().unwrap_or_default(),
        }),
        None => Ok(()),
    }
}

/// Non-empty, at most `max_key_length` characters, allowed charset only.
pub fn validate_key(key: &str, config: &ValidationConfig) -> ValidationResult<()> {
    key.validate_non_empty("key")?;
    validate_length(key, "key", config.max_key_length)?;
    validate_charset(key, "key")
}

/// Same rules as keys, with the store-name length limit.
pub fn validate_store_name(name: &str, config: &ValidationConfig) -> ValidationResult<()> {
    name.validate_non_empty("store")?;
    validate_length(name, "store", config.max_store_name_length)?;
    validate_charset(name, "store")
}

/// An explicit scope follows the store-name rules.
pub fn validate_scope(scope: Option<&str>, config: &ValidationConfig) -> ValidationResult<()> {
    match scope {
        Some(scope) => {
            scope.validate_non_empty("scope")?;
            validate_length(scope, "scope", config.max_store_name_length)?;
            validate_charset(scope, "scope")
        }
        None => Ok(()),
    }
}

/// A listing prefix may be empty; otherwise it follows the key rules.
pub fn validate_prefix(prefix: &str, config: &ValidationConfig) -> ValidationResult<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_length(prefix, "prefix", config.max_key_length)?;
    validate_charset(prefix, "prefix")
}

pub fn validate_page_size(page_size: u32, config: &ValidationConfig) -> ValidationResult<()> {
    page_size.validate_range("page_size", 1, config.max_page_size)
}

/// Serialize a value for storage, enforcing the size limit on its JSON form.
pub fn validate_value<T>(value: &T, config: &ValidationConfig) -> ValidationResult<serde_json::Value>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_value(value).map_err(|e| ValidationError::NotSerializable {
        reason: e.to_string(),
    })?;
    let size = serde_json::to_vec(&json)
        .map_err(|e| ValidationError::NotSerializable {
            reason: e.to_string(),
        })?
        .len();
    if size > config.max_value_bytes {
        return Err(ValidationError::ValueTooLarge {
            size,
            max: config.max_value_bytes,
        });
    }
    Ok(json)
}
