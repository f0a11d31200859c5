//! Form validation for sign-in and sign-up input.
//!
//! These checks run in front-ends before anything reaches the
//! `SessionManager`, which itself only rejects empty input.

use serde::Serialize;
use thiserror::Error;

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 100;

const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";
const ACCENTED_LETTERS: &str = "áéíóúÁÉÍÓÚñÑüÜ";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Email is required")]
    EmailRequired,
    #[error("Invalid email")]
    EmailInvalid,
    #[error("Email is too long")]
    EmailTooLong,

    #[error("Password is required")]
    PasswordRequired,
    #[error("Password must be at least 8 characters")]
    PasswordTooShort,
    #[error("Password is too long")]
    PasswordTooLong,
    #[error("Password must mix at least two of uppercase, lowercase, digits and special characters")]
    PasswordTooWeak,

    #[error("Name is required")]
    NameRequired,
    #[error("Name is too short")]
    NameTooShort,
    #[error("Name is too long")]
    NameTooLong,
    #[error("Name contains invalid characters")]
    NameInvalidCharacters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

impl std::fmt::Display for PasswordStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PasswordStrength::Weak => "weak",
            PasswordStrength::Medium => "medium",
            PasswordStrength::Strong => "strong",
        };
        f.write_str(label)
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if !looks_like_email(email) {
        return Err(ValidationError::EmailInvalid);
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(ValidationError::EmailTooLong);
    }
    Ok(())
}

/// `local@domain.tld`: exactly one `@`, no whitespace, and a dot inside the
/// domain with something on both sides.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Check a password and grade it by how many character classes it uses
pub fn validate_password(password: &str) -> Result<PasswordStrength, ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooLong);
    }

    let classes = [
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| SPECIAL_CHARS.contains(c)),
    ];
    match classes.iter().filter(|&&present| present).count() {
        4 => Ok(PasswordStrength::Strong),
        3 => Ok(PasswordStrength::Medium),
        2 => Ok(PasswordStrength::Weak),
        _ => Err(ValidationError::PasswordTooWeak),
    }
}

pub fn validate_full_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::NameRequired);
    }
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(ValidationError::NameTooShort);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }
    let allowed = |c: char| {
        c.is_ascii_alphabetic()
            || ACCENTED_LETTERS.contains(c)
            || c.is_whitespace()
            || c == '\''
            || c == '-'
    };
    if !name.chars().all(allowed) {
        return Err(ValidationError::NameInvalidCharacters);
    }
    Ok(())
}

/// Trim and drop angle brackets
pub fn sanitize(input: &str) -> String {
    input.trim().chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

/// Per-field outcome of validating a whole form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub email: Option<ValidationError>,
    pub password: Option<ValidationError>,
    pub name: Option<ValidationError>,
    pub password_strength: Option<PasswordStrength>,
}

impl FormErrors {
    pub fn is_valid(&self) -> bool {
        self.email.is_none() && self.password.is_none() && self.name.is_none()
    }

    /// Field errors in display order
    pub fn messages(&self) -> Vec<String> {
        [self.email, self.password, self.name]
            .into_iter()
            .flatten()
            .map(|e| e.to_string())
            .collect()
    }
}

pub fn validate_login_form(email: &str, password: &str) -> FormErrors {
    let password = validate_password(password);
    FormErrors {
        email: validate_email(email).err(),
        password_strength: password.ok(),
        password: password.err(),
        name: None,
    }
}

pub fn validate_register_form(email: &str, password: &str, name: &str) -> FormErrors {
    FormErrors {
        name: validate_full_name(name).err(),
        ..validate_login_form(email, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email("a@b.com"), Ok(()));
        assert_eq!(validate_email("first.last@sub.example.org"), Ok(()));
        assert_eq!(validate_email("   "), Err(ValidationError::EmailRequired));
        assert_eq!(validate_email("a@b"), Err(ValidationError::EmailInvalid));
        assert_eq!(validate_email("a@.com"), Err(ValidationError::EmailInvalid));
        assert_eq!(validate_email("a b@c.com"), Err(ValidationError::EmailInvalid));
        assert_eq!(validate_email("a@b@c.com"), Err(ValidationError::EmailInvalid));
        assert_eq!(validate_email("@b.com"), Err(ValidationError::EmailInvalid));

        let long = format!("{}@example.com", "x".repeat(250));
        assert_eq!(validate_email(&long), Err(ValidationError::EmailTooLong));
    }

    #[test]
    fn test_validate_password_strength() {
        assert_eq!(validate_password(""), Err(ValidationError::PasswordRequired));
        assert_eq!(validate_password("Ab1!"), Err(ValidationError::PasswordTooShort));
        assert_eq!(
            validate_password(&"aA".repeat(65)),
            Err(ValidationError::PasswordTooLong)
        );
        assert_eq!(validate_password("abcdefgh"), Err(ValidationError::PasswordTooWeak));
        assert_eq!(validate_password("abcdefg1"), Ok(PasswordStrength::Weak));
        assert_eq!(validate_password("Abcdefg1"), Ok(PasswordStrength::Medium));
        assert_eq!(validate_password("Abcdef1!"), Ok(PasswordStrength::Strong));
    }

    #[test]
    fn test_validate_full_name() {
        assert_eq!(validate_full_name("José Núñez-O'Brien"), Ok(()));
        assert_eq!(validate_full_name(" "), Err(ValidationError::NameRequired));
        assert_eq!(validate_full_name(" a "), Err(ValidationError::NameTooShort));
        assert_eq!(
            validate_full_name(&"a".repeat(101)),
            Err(ValidationError::NameTooLong)
        );
        assert_eq!(
            validate_full_name("R2D2"),
            Err(ValidationError::NameInvalidCharacters)
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  <b>bold</b> "), "bbold/b");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_register_form_collects_all_errors() {
        let errors = validate_register_form("nope", "short", "x");
        assert!(!errors.is_valid());
        assert_eq!(errors.email, Some(ValidationError::EmailInvalid));
        assert_eq!(errors.password, Some(ValidationError::PasswordTooShort));
        assert_eq!(errors.name, Some(ValidationError::NameTooShort));
        assert_eq!(errors.messages().len(), 3);

        let ok = validate_register_form("a@b.com", "Abcdef1!", "Ana");
        assert!(ok.is_valid());
        assert_eq!(ok.password_strength, Some(PasswordStrength::Strong));
    }

    #[test]
    fn test_login_form() {
        assert!(validate_login_form("a@b.com", "abcdefg1").is_valid());
        let errors = validate_login_form("", "");
        assert_eq!(errors.email, Some(ValidationError::EmailRequired));
        assert_eq!(errors.password, Some(ValidationError::PasswordRequired));
        assert_eq!(errors.name, None);
    }
}
