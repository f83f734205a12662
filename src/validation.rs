//! Validation helpers for configuration parameters.

use std::ops::RangeInclusive;

/// Log levels accepted by the configuration and the tracing setup.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates that a value is finite and strictly positive.
///
/// # Arguments
///
/// * `value` - The value to validate.
///
/// # Returns
///
/// * `Ok(())` if the value is usable as a duration, rate or tolerance.
/// * `Err(&'static str)` otherwise.
pub fn is_positive_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Value must be finite and greater than 0")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates a relative tolerance, which must lie in `(0, 1]`.
pub fn is_relative_tolerance(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err("Relative tolerance must be in (0, 1]")
    }
}

/// Validates a log level name (case insensitive).
pub fn is_valid_log_level(level: &str) -> Result<(), &'static str> {
    let level = level.to_lowercase();
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(())
    } else {
        Err("Log level must be one of: trace, debug, info, warn, error")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}
