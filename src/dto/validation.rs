//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of a session join code.
pub const SESSION_CODE_LENGTH: usize = 6;

/// Validates that a join code is made of exactly six ASCII letters (any case).
///
/// # Examples
///
/// ```ignore
/// validate_session_code("QWERTY") // Ok
/// validate_session_code("qwerty") // Ok - codes are case-insensitive
/// validate_session_code("QWERT1") // Err - digit
/// ```
pub fn validate_session_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if code.len() != SESSION_CODE_LENGTH {
        let mut err = ValidationError::new("session_code_length");
        err.message = Some(
            format!(
                "Session code must be exactly {SESSION_CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphabetic()) {
        let mut err = ValidationError::new("session_code_format");
        err.message = Some("Session code must contain only letters".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects strings made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}
