//! Request validation that happens before a call reaches the services
//!
//! The services re-validate everything they are given; these checks exist to
//! reject obviously malformed input with a message naming the field.

use once_cell::sync::Lazy;
use regex::Regex;

use bastion_core::{BastionError, Result, MAX_BATCH};

pub const MAX_TOKEN_LENGTH: usize = 8192;

/// Relation and permission names.
static NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z_]{0,63}$").unwrap());

/// Canonical hyphenated lowercase UUID.
static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Collects field errors and reports them together as one `invalid-argument`.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let message = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BastionError::invalid_argument(message))
    }

    pub fn error(&mut self, field: &str, message: &str) -> &mut Self {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Relation or permission name.
    pub fn name(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.error(field, "is required");
        } else if !NAME_REGEX.is_match(value) {
            self.error(field, "must match [a-z][a-z_]{0,63}");
        }
        self
    }

    pub fn uuid(&mut self, field: &str, value: &str) -> &mut Self {
        if !UUID_REGEX.is_match(value) {
            self.error(field, "must be a lowercase hyphenated UUID");
        }
        self
    }

    pub fn token(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, "is required");
        } else if value.len() > MAX_TOKEN_LENGTH {
            self.error(field, "is too long");
        }
        self
    }

    /// Batch of 1..=1000 items.
    pub fn batch<T>(&mut self, field: &str, items: &[T]) -> &mut Self {
        if items.is_empty() {
            self.error(field, "must not be empty");
        } else if items.len() > MAX_BATCH {
            self.error(field, "exceeds 1000 items");
        }
        self
    }
}

/// Parses a path segment into a typed id.
pub fn path_id<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = BastionError>,
{
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{DomainId, ErrorKind};

    #[test]
    fn test_name_validation() {
        let mut v = Validator::new();
        v.name("permission", "view").name("relation", "domain_admin");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.name("permission", "View");
        assert!(v.validate().is_err());

        let mut v = Validator::new();
        v.name("permission", "");
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_errors_are_joined() {
        let mut v = Validator::new();
        v.uuid("subject", "not-a-uuid").batch::<u8>("tuples", &[]);
        let err = v.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let message = err.to_string();
        assert!(message.contains("subject"));
        assert!(message.contains("tuples"));
    }

    #[test]
    fn test_uuid_must_be_canonical() {
        let mut v = Validator::new();
        v.uuid("id", "550e8400-e29b-41d4-a716-446655440000");
        assert!(v.validate().is_ok());

        let mut v = Validator::new();
        v.uuid("id", "550E8400-E29B-41D4-A716-446655440000");
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_path_id() {
        let id = DomainId::new();
        assert_eq!(path_id::<DomainId>(&id.to_string()).unwrap(), id);
        assert!(path_id::<DomainId>("acme").is_err());
    }
}
