//! Strongly-typed identifiers for principals

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{BastionError, Result};

/// Well-known id of the single platform object.
pub const PLATFORM_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Parses `s` as a UUID and requires the 36-char lowercase hyphenated rendering.
pub fn parse_canonical_uuid(entity: &str, s: &str) -> Result<Uuid> {
    let uuid = Uuid::parse_str(s)
        .map_err(|_| BastionError::invalid_argument(format!("invalid {} id: {:?}", entity, s)))?;
    if uuid.hyphenated().to_string() != s {
        return Err(BastionError::invalid_argument(format!(
            "{} id must be in canonical form: {:?}",
            entity, s
        )));
    }
    Ok(uuid)
}

macro_rules! define_id {
    ($name:ident, $entity:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub const ENTITY: &'static str = $entity;

            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }

            /// Strict parse used at API boundaries.
            pub fn parse(s: &str) -> Result<Self> {
                parse_canonical_uuid($entity, s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = BastionError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_id!(UserId, "user");
define_id!(DomainId, "domain");
define_id!(GroupId, "group");
define_id!(ThingId, "thing");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let id1 = DomainId::new();
        let id2 = DomainId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_renders_canonical() {
        let id = UserId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
        assert_eq!(UserId::parse(&rendered).unwrap(), id);
    }

    #[test]
    fn test_non_canonical_rejected() {
        let id = UserId::new();
        let upper = id.to_string().to_uppercase();
        assert!(UserId::parse(&upper).is_err());

        let simple = id.as_uuid().simple().to_string();
        assert!(UserId::parse(&simple).is_err());
        assert!(UserId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_platform_id_is_canonical() {
        assert!(parse_canonical_uuid("platform", PLATFORM_ID).is_ok());
    }
}
