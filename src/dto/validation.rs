//! Validation helpers for DTOs.

use serde_json::Value;
use validator::ValidationError;

/// Parse a manual score entry: a non-negative integer given as a JSON number
/// or as a (trimmed) numeric string.
pub fn parse_score(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok()
}

/// Validates that a manual score value is a non-negative integer.
///
/// ```ignore
/// validate_score_value(&json!(7))      // Ok
/// validate_score_value(&json!("12"))   // Ok
/// validate_score_value(&json!(-1))     // Err
/// validate_score_value(&json!("abc"))  // Err
/// ```
pub fn validate_score_value(value: &Value) -> Result<(), ValidationError> {
    let valid = match value {
        Value::Number(number) => number
            .as_u64()
            .is_some_and(|n| u32::try_from(n).is_ok()),
        Value::String(text) => parse_score(text).is_some(),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("score_value");
        err.message = Some(format!("score must be a non-negative integer (got {value})").into());
        Err(err)
    }
}
