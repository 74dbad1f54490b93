//! Input validation for the admin identity.

use std::sync::LazyLock;

use regex::Regex;

use crate::{credentials::PlaintextPassword, error::ValidationError};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

/// Longest accepted username.
pub const USERNAME_MAX_LEN: usize = 32;
/// Shortest accepted password, in characters.
pub const PASSWORD_MIN_LEN: usize = 8;
/// bcrypt ignores everything past 72 bytes.
pub const PASSWORD_MAX_BYTES: usize = 72;
/// Longest accepted display name, in characters.
pub const DISPLAY_NAME_MAX_LEN: usize = 64;

/// ASCII letters and digits only, 1 to 32 characters.
pub fn validate_username(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.len() > USERNAME_MAX_LEN
        || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ValidationError::Username);
    }
    Ok(trimmed.to_string())
}

/// Check a password and its confirmation. Passwords are not trimmed.
pub fn validate_password(
    password: &PlaintextPassword,
    confirmation: &PlaintextPassword,
) -> Result<(), ValidationError> {
    if password.len() < PASSWORD_MIN_LEN {
        return Err(ValidationError::Password {
            reason: "must be at least 8 characters",
        });
    }
    if password.as_str().len() > PASSWORD_MAX_BYTES {
        return Err(ValidationError::Password {
            reason: "must be at most 72 bytes",
        });
    }
    if password.as_str().chars().any(char::is_control) {
        return Err(ValidationError::Password {
            reason: "must not contain control characters",
        });
    }
    if password.as_str() != confirmation.as_str() {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// Trimmed address that looks like `local@domain.tld`.
pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if !EMAIL_PATTERN.is_match(trimmed) {
        return Err(ValidationError::Email(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Trimmed, non-empty name without control characters.
pub fn validate_display_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::DisplayName {
            reason: "must not be empty",
        });
    }
    if trimmed.chars().count() > DISPLAY_NAME_MAX_LEN {
        return Err(ValidationError::DisplayName {
            reason: "must be at most 64 characters",
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::DisplayName {
            reason: "must not contain control characters",
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(raw: &str) -> PlaintextPassword {
        PlaintextPassword::new(raw)
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username(" admin42 ").unwrap(), "admin42");
        assert!(validate_username("").is_err());
        assert!(validate_username("ad-min").is_err());
        assert!(validate_username("ädmin").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password(&pw("long enough"), &pw("long enough")).is_ok());
        assert_eq!(
            validate_password(&pw("short"), &pw("short")),
            Err(ValidationError::Password {
                reason: "must be at least 8 characters"
            })
        );
        assert_eq!(
            validate_password(&pw("password-one"), &pw("password-two")),
            Err(ValidationError::PasswordMismatch)
        );
        let long = "x".repeat(73);
        assert!(validate_password(&pw(&long), &pw(&long)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(
            validate_email("admin@example.com ").unwrap(),
            "admin@example.com"
        );
        assert!(validate_email("admin@example").is_err());
        assert!(validate_email("admin example.com").is_err());
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert_eq!(
            validate_display_name(" Ada Lovelace ").unwrap(),
            "Ada Lovelace"
        );
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("bad\u{7}bell").is_err());
        assert!(validate_display_name(&"n".repeat(65)).is_err());
    }
}
