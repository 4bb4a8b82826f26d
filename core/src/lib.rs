//! Core utilities and shared types for the fuzzermon results store.

pub mod limits;

use thiserror::Error;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A value rejected before it reaches the database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{field} is {len} characters long, limit is {max}")]
    TooLong { field: &'static str, max: usize, len: usize },
}

/// Checks `value` against a column's max length, counted in characters.
pub fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), FieldError> {
    let len = value.chars().count();
    if len > max {
        return Err(FieldError::TooLong { field, max, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn exact_limit_is_accepted() {
        let name = "a".repeat(limits::USERNAME);
        assert!(check_len("username", &name, limits::USERNAME).is_ok());
    }

    #[test]
    fn over_limit_reports_field_and_length() {
        let name = "a".repeat(limits::ARCH_NAME + 1);
        let err = check_len("name", &name, limits::ARCH_NAME).unwrap_err();
        assert_eq!(err, FieldError::TooLong { field: "name", max: 64, len: 65 });
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 64 two-byte characters
        let name = "é".repeat(64);
        assert!(check_len("username", &name, limits::USERNAME).is_ok());
    }

    #[test]
    fn empty_values_are_allowed() {
        assert!(check_len("location", "", limits::STATE_LOCATION).is_ok());
    }
}
