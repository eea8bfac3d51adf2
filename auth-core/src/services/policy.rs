//! Password policy validation.

use crate::config::PasswordPolicy;

/// Password policy violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    TooShort { min_length: u8, actual_length: usize },
    MissingUppercase,
    MissingNumber,
    MissingSpecial,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyError::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::MissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Validate a candidate password against the configured policy.
///
/// Returns the first violation found.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Result<(), PolicyError> {
    if password.chars().count() < policy.min_length as usize {
        return Err(PolicyError::TooShort {
            min_length: policy.min_length,
            actual_length: password.chars().count(),
        });
    }

    if policy.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PolicyError::MissingUppercase);
    }

    if policy.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PolicyError::MissingNumber);
    }

    if policy.require_special && !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return Err(PolicyError::MissingSpecial);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy {
            min_length: 12,
            require_uppercase: true,
            require_number: true,
            require_special: true,
            history_depth: 5,
        }
    }

    #[test]
    fn accepts_conforming_password() {
        assert!(validate_password("Correct-Horse-7", &policy()).is_ok());
    }

    #[test]
    fn rejects_short_password() {
        let err = validate_password("Short-7", &policy()).expect_err("too short");
        assert!(matches!(err, PolicyError::TooShort { .. }));
    }

    #[test]
    fn rejects_missing_character_classes() {
        assert_eq!(
            validate_password("lowercase-only-7", &policy()),
            Err(PolicyError::MissingUppercase)
        );
        assert_eq!(
            validate_password("No-Numbers-Here", &policy()),
            Err(PolicyError::MissingNumber)
        );
        assert_eq!(
            validate_password("NoSpecials777x", &policy()),
            Err(PolicyError::MissingSpecial)
        );
    }
}
