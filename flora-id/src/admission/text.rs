//! Chat message sanitation

use crate::error::ValidationFailure;

/// Trim, strip control characters (newline and tab survive), enforce length
///
/// Length is counted in characters after cleaning.
pub fn sanitize_message(raw: &str, max_chars: usize) -> Result<String, ValidationFailure> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let chars = cleaned.chars().count();
    if chars > max_chars {
        return Err(ValidationFailure::MessageTooLong {
            chars,
            limit: max_chars,
        });
    }
    Ok(cleaned)
}
