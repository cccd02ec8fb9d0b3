//! Call-number rules shared by imports, manual entry and phone edits.
//!
//! A valid call number is exactly nine ASCII digits and never starts with `0`.
//! Separators, spaces and country-code punctuation are stripped before the
//! check, so `"977-123-456"` is accepted while `"0977123456"` is not.

use crate::{ModelError, ModelResult};

/// Required number of digits in a call number
pub const PHONE_DIGITS: usize = 9;

/// Strip every character that is not an ASCII digit.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Digit-only form with all leading zeros removed.
///
/// `normalize_phone(normalize_phone(x)) == normalize_phone(x)` for every input.
pub fn normalize_phone(input: &str) -> String {
    digits_only(input).trim_start_matches('0').to_string()
}

/// Validate a raw call number and return its cleaned digits.
///
/// The error carries the cleaned digits so callers can offer them as a
/// suggested fix.
pub fn validate_phone(input: &str) -> ModelResult<String> {
    let digits = digits_only(input);
    if digits.len() != PHONE_DIGITS {
        return Err(ModelError::PhoneLength { digits });
    }
    if digits.starts_with('0') {
        return Err(ModelError::PhoneLeadingZero { digits });
    }
    Ok(digits)
}

/// Check whether a raw call number passes [`validate_phone`].
pub fn is_valid_phone(input: &str) -> bool {
    validate_phone(input).is_ok()
}

/// Sanitize text typed into a call-number field.
///
/// Keeps digits only, truncates to nine and drops a single leading zero,
/// mirroring what the entry form enforces keystroke by keystroke.
pub fn sanitize_phone_input(input: &str) -> String {
    let mut digits: String = digits_only(input).chars().take(PHONE_DIGITS).collect();
    if digits.starts_with('0') {
        digits.remove(0);
    }
    digits
}
