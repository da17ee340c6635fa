//! Field rules shared by several resources. Each helper names the field it
//! rejects so the host can point the user at the offending attribute.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::error::{ApigwError, ApigwResult};

/// Letters, digits and underscores, 3 to 64 characters, leading letter
pub static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{2,63}$").expect("static regex"));

/// Like [`IDENTIFIER`] but also allowing hyphens
pub static GATEWAY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{2,63}$").expect("static regex"));

/// Request parameter names: leading letter, then letters, digits, `-`, `_`, `.`
pub static PARAM_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]{0,31}$").expect("static regex"));

/// Application codes: 64 to 180 characters from a restricted alphabet
pub static APP_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9+/][A-Za-z0-9+_!@#$%/=-]{63,179}$").expect("static regex")
});

pub fn check_pattern(field: &str, value: &str, pattern: &Regex, rule: &str) -> ApigwResult<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ApigwError::validation(
            field,
            format!("'{}' is invalid: {}", value, rule),
        ))
    }
}

pub fn check_range<T>(field: &str, value: T, min: T, max: T) -> ApigwResult<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ApigwError::validation(
            field,
            format!("{} is out of range [{}, {}]", value, min, max),
        ));
    }
    Ok(())
}

pub fn check_max_len(field: &str, value: &str, max: usize) -> ApigwResult<()> {
    if value.chars().count() > max {
        return Err(ApigwError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(())
}

pub fn check_not_empty(field: &str, value: &str) -> ApigwResult<()> {
    if value.trim().is_empty() {
        return Err(ApigwError::validation(field, "must not be empty"));
    }
    Ok(())
}
